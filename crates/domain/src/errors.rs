//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 客户端标识为空
    #[error("client identity must not be empty")]
    EmptyIdentity,

    /// 入站帧无法解码为信封
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    /// 入站帧超过大小限制
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
}
