use domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid client identity: {0}")]
    InvalidIdentity(#[from] DomainError),
    #[error("hub is not running")]
    Closed,
    /// 房间集合与会话表不一致，属于不可恢复的错误
    #[error("registry invariant violated: {0}")]
    RegistryCorrupted(String),
    #[error("dispatcher task failed: {0}")]
    DispatcherFailed(String),
}

impl HubError {
    pub fn corrupted(message: impl Into<String>) -> Self {
        HubError::RegistryCorrupted(message.into())
    }
}
