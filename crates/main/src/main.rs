//! 主应用程序入口
//!
//! 加载配置、打开存储、加载插件，启动聊天服务器与 Axum 路由。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatServer, ChatServerDependencies, ServerSettings};
use config::{AppConfig, StorageBackendKind};
use infrastructure::{Infrastructure, InfrastructureConfig, StorageBackend};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, HttpSettings};

fn storage_backend(config: &AppConfig) -> anyhow::Result<StorageBackend> {
    let storage = &config.storage;
    Ok(match storage.backend {
        StorageBackendKind::Memory => StorageBackend::Memory,
        StorageBackendKind::Json => StorageBackend::Json {
            path: storage
                .path
                .clone()
                .context("storage.path is required for the json backend")?,
        },
        StorageBackendKind::Postgres => StorageBackend::Postgres {
            database_url: storage
                .database_url
                .clone()
                .context("storage.database_url is required for the postgres backend")?,
            max_connections: storage.max_connections,
        },
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    // 插件名称错误属于启动错误，在打开存储之前检查
    let loaded = plugins::load(
        &config.plugins.enabled,
        &plugins::PluginSettings {
            themes: config.plugins.themes.clone(),
        },
    )?;

    let infra = Infrastructure::connect(InfrastructureConfig {
        storage: storage_backend(&config)?,
        bcrypt_cost: config.auth.bcrypt_cost,
        upload_dir: config.uploads.dir.clone(),
        upload_url_prefix: config.uploads.url_prefix.clone(),
    })
    .await?;

    let server = ChatServer::new(ChatServerDependencies {
        storage: infra.storage.clone(),
        uploads: infra.upload_store_trait(),
        password_hasher: infra.password_hasher_trait(),
        settings: ServerSettings {
            name: config.server.name.clone(),
            description: config.server.description.clone(),
            public_url: config.server.public_url.clone(),
            infinite_signup_code: config.auth.infinite_signup_code.clone(),
            infinite_signup_group: config.auth.infinite_signup_group.clone(),
            max_upload_bytes: config.uploads.max_bytes,
        },
    });
    server.start(&loaded.plugins).await?;
    tracing::info!(plugins = ?loaded.names(), "plugins loaded");

    let app = router(
        AppState::new(Arc::clone(&server)),
        &HttpSettings {
            invite_dir: config.invite_page.dir.clone(),
            upload_dir: config.uploads.dir.clone(),
            upload_url_prefix: config.uploads.url_prefix.clone(),
        },
        loaded.routers,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %config.bind_address(), "voxroom listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    server.stop().await?;
    Ok(())
}
