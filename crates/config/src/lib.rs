//! 统一配置中心
//!
//! 加载顺序：内置默认值 → `VOXROOM_CONFIG` 指向的文件（按扩展名识别
//! TOML/YAML/JSON）→ `VOXROOM_` 前缀的环境变量，嵌套字段用 `__` 分隔，
//! 例如 `VOXROOM_SERVER__PORT=9001`。

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const CONFIG_FILE_ENV: &str = "VOXROOM_CONFIG";
pub const ENV_PREFIX: &str = "VOXROOM_";

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 邀请链接使用的外部地址
    #[validate(url)]
    pub public_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    Json,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// json 后端的数据文件
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    #[validate(url)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    /// 可无限次使用的注册码
    #[serde(default)]
    pub infinite_signup_code: Option<String>,
    #[validate(length(min = 1))]
    pub infinite_signup_group: String,
    #[serde(default)]
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadConfig {
    pub dir: PathBuf,
    #[validate(length(min = 1))]
    pub url_prefix: String,
    #[validate(range(min = 1))]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvitePageConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PluginConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
    /// `themes` 插件在欢迎包中公布的主题
    #[serde(default)]
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[validate(nested)]
    pub uploads: UploadConfig,
    #[validate(nested)]
    pub invite_page: InvitePageConfig,
    #[serde(default)]
    #[validate(nested)]
    pub plugins: PluginConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 9000,
                name: "voxroom".into(),
                description: String::new(),
                public_url: "http://localhost:9000".into(),
            },
            storage: StorageConfig {
                backend: StorageBackendKind::Json,
                path: Some(PathBuf::from("data/voxroom.json")),
                database_url: None,
                max_connections: 5,
            },
            auth: AuthConfig {
                infinite_signup_code: None,
                infinite_signup_group: "user".into(),
                bcrypt_cost: None,
            },
            uploads: UploadConfig {
                dir: PathBuf::from("data/uploads"),
                url_prefix: "/uploads".into(),
                max_bytes: 10 * 1024 * 1024,
            },
            invite_page: InvitePageConfig {
                dir: PathBuf::from("static/invite"),
            },
            plugins: PluginConfig::default(),
        }
    }
}

/// 能通过字段校验但无法启动的配置。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("storage.path is required for the json backend")]
    MissingStoragePath,
    #[error("storage.database_url is required for the postgres backend")]
    MissingDatabaseUrl,
}

impl AppConfig {
    /// 组合全部配置来源，尚未提取。
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 加载、校验配置，并检查启动前必须满足的组合条件。
    pub fn load() -> anyhow::Result<Self> {
        let cfg: AppConfig = Self::figment().extract()?;
        cfg.validate()?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        match self.storage.backend {
            StorageBackendKind::Json if self.storage.path.is_none() => {
                Err(ConfigError::MissingStoragePath)
            }
            StorageBackendKind::Postgres if self.storage.database_url.is_none() => {
                Err(ConfigError::MissingDatabaseUrl)
            }
            _ => Ok(()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 用于日志输出，隐藏数据库凭据与注册码。
    pub fn sanitize(&self) -> String {
        let mut clean = self.clone();
        if let Some(url) = clean.storage.database_url.as_mut() {
            *url = redact_url_credentials(url);
        }
        if clean.auth.infinite_signup_code.is_some() {
            clean.auth.infinite_signup_code = Some(REDACTED.to_string());
        }
        format!("{clean:?}")
    }
}

fn redact_url_credentials(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return REDACTED.to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://{REDACTED}@{host}"),
        None => url.to_string(),
    }
}
