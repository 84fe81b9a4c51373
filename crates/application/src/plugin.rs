use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::ApplicationError, server::ChatServer};

/// 插件契约
///
/// 服务器在开始接受连接前调用一次 `start`，前后分别触发
/// `pluginprep` / `pluginstart`。插件只通过事件总线和 [`ChatServer`]
/// 的公开方法与核心交互；需要长期持有服务器时请保存 `Weak`，
/// 避免与事件总线上的监听器形成引用环。
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, server: Arc<ChatServer>) -> Result<(), ApplicationError>;
}
