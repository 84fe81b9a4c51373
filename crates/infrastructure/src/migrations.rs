use sqlx::migrate::Migrator;

/// 编译期嵌入的 PostgreSQL 迁移脚本。
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
