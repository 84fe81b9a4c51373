use std::path::{Component, Path, PathBuf};

use application::{UploadError, UploadStore};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// 把上传写到本地目录，由 HTTP 侧以 `url_prefix` 对外提供。
#[derive(Debug, Clone)]
pub struct LocalUploadStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalUploadStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(UploadError::io(format!(
                "refusing to write outside upload root: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl UploadStore for LocalUploadStore {
    async fn store(&self, path: String, bytes: Vec<u8>) -> Result<String, UploadError> {
        let target = self.resolve(&path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| UploadError::io(err.to_string()))?;
        }
        fs::write(&target, &bytes)
            .await
            .map_err(|err| UploadError::io(err.to_string()))?;
        debug!(path = %target.display(), bytes = bytes.len(), "upload stored");

        Ok(format!("{}/{}", self.url_prefix.trim_end_matches('/'), path))
    }
}
