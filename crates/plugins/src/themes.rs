use std::sync::Arc;

use application::{ApplicationError, ChatServer, EventChannel, Plugin, Priority};
use async_trait::async_trait;
use serde_json::json;

pub const NAME: &str = "themes";

/// 在欢迎包里公布可选主题。
pub struct ThemesPlugin {
    themes: Vec<String>,
}

impl ThemesPlugin {
    pub fn new(themes: Vec<String>) -> Self {
        Self { themes }
    }
}

#[async_trait]
impl Plugin for ThemesPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, server: Arc<ChatServer>) -> Result<(), ApplicationError> {
        let themes = json!(self.themes);
        server
            .events()
            .listen_fn(EventChannel::ConnectionNew, Priority::Normal, move |event| {
                event.set("themes", themes.clone());
            })
            .await?;
        Ok(())
    }
}
