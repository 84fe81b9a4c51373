use std::{path::PathBuf, sync::Arc};

use application::{PasswordHasher, Storage, UploadStore};
use thiserror::Error;
use tracing::info;

use crate::{
    json_storage::JsonFileStorage,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    pg_storage::{create_pg_pool, PgStorage},
    uploads::LocalUploadStore,
};

/// 存储后端选择。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Json { path: PathBuf },
    Postgres { database_url: String, max_connections: u32 },
}

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub storage: StorageBackend,
    pub bcrypt_cost: Option<u32>,
    pub upload_dir: PathBuf,
    pub upload_url_prefix: String,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            bcrypt_cost: None,
            upload_dir: PathBuf::from("uploads"),
            upload_url_prefix: "/uploads".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<dyn Storage>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    pub uploads: Arc<LocalUploadStore>,
}

impl Infrastructure {
    /// 按配置打开存储后端；PostgreSQL 会先执行迁移。
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageBackend::Memory => {
                info!("using in-memory storage");
                Arc::new(application::MemoryStorage::new())
            }
            StorageBackend::Json { path } => {
                info!(path = %path.display(), "using json file storage");
                Arc::new(JsonFileStorage::open(path))
            }
            StorageBackend::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = create_pg_pool(database_url, *max_connections).await?;
                MIGRATOR.run(&pool).await?;
                info!(max_connections, "using postgres storage");
                Arc::new(PgStorage::new(pool))
            }
        };

        let password_hasher = Arc::new(BcryptPasswordHasher::new(config.bcrypt_cost));
        let uploads = Arc::new(LocalUploadStore::new(
            config.upload_dir,
            config.upload_url_prefix,
        ));

        Ok(Self {
            storage,
            password_hasher,
            uploads,
        })
    }

    pub fn password_hasher_trait(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }

    pub fn upload_store_trait(&self) -> Arc<dyn UploadStore> {
        self.uploads.clone()
    }
}
