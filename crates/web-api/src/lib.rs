//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 接入点把连接交给 [`application::Hub`]，
//! 其余 HTTP 接口用于在线查询和服务端推送。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
