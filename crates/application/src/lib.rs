//! 应用层实现。
//!
//! 实时广播中心：在线状态登记表、串行执行命令的调度器、每连接一个的客户端会话，
//! 以及对外的 [`Hub`] 门面。具体传输（WebSocket 等）通过 [`transport`] 中的
//! 读写半部分接入。

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod registry;
pub mod session;
pub mod transport;

pub use command::{Broadcast, Command, OutboundFrame, Registration, Relay};
pub use dispatcher::Dispatcher;
pub use error::HubError;
pub use hub::Hub;
pub use registry::{DropReason, PresenceView, Registry};
pub use session::{ClientSession, SessionObserver, SessionState};
pub use transport::{Frame, FrameSink, FrameSource, TransportError};
