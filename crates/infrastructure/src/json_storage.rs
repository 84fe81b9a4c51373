//! JSON 文件存储后端
//!
//! 复用 [`MemoryStorage`] 的全部语义，每次变更后把完整状态写成一个 JSON 文档。
//! 先写临时文件再改名，避免进程中途退出时留下半个文件。

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use application::{MemoryStorage, StatePersistence, StorageResult, StorageState};
use async_trait::async_trait;
use domain::StorageError;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

pub struct JsonFilePersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "storage.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_err(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::storage(format!("{}: {err}", path.display()))
}

#[async_trait]
impl StatePersistence for JsonFilePersistence {
    async fn load(&self) -> StorageResult<Option<StorageState>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "storage file not found, starting empty");
                return Ok(None);
            }
            Err(err) => return Err(io_err(&self.path, err)),
        };
        let state = serde_json::from_slice(&bytes).map_err(|err| {
            StorageError::storage(format!("{}: invalid storage file: {err}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    async fn persist(&self, state: &StorageState) -> StorageResult<()> {
        let body = serde_json::to_vec_pretty(state)
            .map_err(|err| StorageError::storage(err.to_string()))?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_err(parent, err))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &body).await.map_err(|err| io_err(&temp, err))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|err| io_err(&self.path, err))?;
        debug!(path = %self.path.display(), bytes = body.len(), "storage file written");
        Ok(())
    }
}

/// 以 `path` 为数据文件的存储后端。
pub struct JsonFileStorage;

impl JsonFileStorage {
    pub fn open(path: impl Into<PathBuf>) -> MemoryStorage {
        MemoryStorage::with_persistence(Arc::new(JsonFilePersistence::new(path)))
    }
}
