//! 基础设施层实现。
//!
//! 提供存储后端（JSON 文件、PostgreSQL）、bcrypt 密码哈希与本地上传目录，
//! 实现应用层定义的接口。

pub mod builder;
pub mod json_storage;
pub mod migrations;
pub mod password;
pub mod pg_storage;
pub mod uploads;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError, StorageBackend};
pub use json_storage::{JsonFilePersistence, JsonFileStorage};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use pg_storage::{create_pg_pool, PgStorage};
pub use uploads::LocalUploadStore;
