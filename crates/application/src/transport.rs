//! 会话与具体传输层之间的接缝
//!
//! 会话只认识文本帧和关闭帧；WebSocket 等适配器负责把各自的消息类型
//! 转换成 [`Frame`]，并把读半部分和写半部分分别交给会话。

use futures_util::{Sink, Stream};
use thiserror::Error;

/// 会话层看到的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("transport failure: {0}")]
    Io(String),
}

/// 连接的读半部分
pub trait FrameSource: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static {}

impl<T> FrameSource for T where
    T: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static
{
}

/// 连接的写半部分
pub trait FrameSink: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

impl<T> FrameSink for T where T: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}
