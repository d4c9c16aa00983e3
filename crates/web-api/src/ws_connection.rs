//! WebSocket 连接适配
//!
//! 把 axum 的 [`WebSocket`] 拆成读写两半，转换成会话层的 [`Frame`] 后交给广播中心。
//! Ping/Pong 由 axum 自动应答，不进入会话。

use std::sync::Arc;

use application::{Frame, Hub, TransportError};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{future, SinkExt, StreamExt};

/// 接管一个已升级的连接，直到会话结束
pub async fn serve(socket: WebSocket, hub: Arc<Hub>, user_id: String, room_id: String) {
    let (sink, stream) = socket.split();

    let reader = stream.filter_map(|message| future::ready(into_frame(message)));
    let writer = sink
        .sink_map_err(|err| TransportError::Io(err.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))));

    match hub
        .handle_connection(&user_id, &room_id, reader, writer)
        .await
    {
        Ok(observer) => {
            tracing::info!(
                user_id = %user_id,
                room_id = %room_id,
                session_id = %observer.session_id(),
                "WebSocket 连接已建立"
            );
            observer.closed().await;
            tracing::info!(user_id = %user_id, "WebSocket 连接已关闭");
        }
        Err(err) => {
            // 读写两半随之释放，连接被关闭
            tracing::warn!(user_id = %user_id, error = %err, "rejecting websocket connection");
        }
    }
}

fn into_frame(message: Result<WsMessage, axum::Error>) -> Option<Result<Frame, TransportError>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(_) => {
                tracing::debug!("dropping non-utf8 binary frame");
                None
            }
        },
        Ok(WsMessage::Close(_)) => Some(Ok(Frame::Close)),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => None,
        Err(err) => Some(Err(TransportError::Io(err.to_string()))),
    }
}

fn into_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Close => WsMessage::Close(None),
    }
}
