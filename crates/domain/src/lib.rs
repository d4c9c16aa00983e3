//! 广播中心核心领域模型
//!
//! 包含客户端标识、房间标识、会话标识，以及 WebSocket 线上信封格式。

pub mod envelope;
pub mod errors;
pub mod value_objects;

// 重新导出常用类型
pub use envelope::*;
pub use errors::*;
pub use value_objects::*;
