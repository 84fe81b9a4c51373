//! Web API 层。
//!
//! WebSocket 端点把每个套接字交给应用层的协议状态机；
//! 其余 HTTP 路由只提供邀请页、上传文件、健康检查和插件路由。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::{router, HttpSettings};
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
