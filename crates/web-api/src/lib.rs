//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 作为实时连接的传输层，HTTP 接口提供历史消息与在线状态查询。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
