//! 内置插件
//!
//! 每个插件只通过 [`application::Plugin`] 契约、事件总线和
//! [`application::ChatServer`] 的公开方法与核心交互。

pub mod audit;
pub mod moderation;
pub mod themes;

use std::sync::Arc;

use application::Plugin;
use axum::Router;
use thiserror::Error;
use tracing::warn;

pub use audit::AuditPlugin;
pub use moderation::ModerationPlugin;
pub use themes::ThemesPlugin;

/// 插件加载时需要的外部设置。
#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    pub themes: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("unknown plugin \"{0}\"")]
    Unknown(String),
}

/// 已实例化的插件，以及它们贡献的 HTTP 路由。
#[derive(Default)]
pub struct LoadedPlugins {
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub routers: Vec<Router>,
}

impl LoadedPlugins {
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }
}

/// 按名称实例化插件，保持配置中的顺序；未知名称是启动错误。
pub fn load(names: &[String], settings: &PluginSettings) -> Result<LoadedPlugins, PluginLoadError> {
    let mut loaded = LoadedPlugins::default();
    for name in names {
        if loaded.plugins.iter().any(|p| p.name() == name) {
            warn!(plugin = %name, "plugin listed twice, ignoring duplicate");
            continue;
        }
        match name.as_str() {
            themes::NAME => loaded
                .plugins
                .push(Arc::new(ThemesPlugin::new(settings.themes.clone()))),
            audit::NAME => {
                let plugin = AuditPlugin::new();
                loaded.routers.push(plugin.router());
                loaded.plugins.push(Arc::new(plugin));
            }
            moderation::NAME => loaded.plugins.push(Arc::new(ModerationPlugin)),
            other => return Err(PluginLoadError::Unknown(other.to_string())),
        }
    }
    Ok(loaded)
}
