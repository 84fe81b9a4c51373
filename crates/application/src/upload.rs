//! 消息内联上传
//!
//! 客户端在 `message.upload` 中携带 base64 编码的文件（可以是 `data:` URL）。
//! 解码、限制大小、探测图片尺寸后交给 [`UploadStore`] 写入，返回可访问的 URL。

use std::io::Cursor;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use domain::UserId;
use rand::{distr::Alphanumeric, Rng};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload data")]
    Decode,
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("upload io error: {0}")]
    Io(String),
}

impl UploadError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// 只有写入失败属于服务端故障，其余都是客户端输入问题。
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// `message` 包中的上传字段。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadPayload {
    pub filename: String,
    pub data: String,
}

/// 写入完成后的附件信息，图片才有尺寸。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredUpload {
    pub url: String,
    pub img: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// 上传文件的存储位置，返回文件的公开 URL。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn store(&self, path: String, bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// 解码 base64 数据并检查大小。
pub fn decode_payload(data: &str, max_bytes: usize) -> Result<Vec<u8>, UploadError> {
    let encoded = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    // base64 膨胀约 4/3，先用编码长度粗略拒绝过大的输入
    if encoded.len() / 4 * 3 > max_bytes + 3 {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| UploadError::Decode)?;
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }
    Ok(bytes)
}

/// 只保留字母数字、`.`、`-`、`_`，其余替换为 `_`。
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<userid>/<8 位随机字符>-<文件名>`，随机前缀避免同名覆盖。
pub fn upload_path(user_id: UserId, filename: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}/{}-{}", user_id, suffix, sanitize_filename(filename))
}

async fn probe_dimensions(bytes: Vec<u8>) -> Option<(u32, u32)> {
    tokio::task::spawn_blocking(move || {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    })
    .await
    .ok()
    .flatten()
}

/// 解码、探测并写入上传文件。
pub async fn store_upload(
    store: &dyn UploadStore,
    user_id: UserId,
    payload: &UploadPayload,
    max_bytes: usize,
) -> Result<StoredUpload, UploadError> {
    let bytes = decode_payload(&payload.data, max_bytes)?;
    let dimensions = probe_dimensions(bytes.clone()).await;
    let path = upload_path(user_id, &payload.filename);
    let url = store.store(path, bytes).await?;
    debug!(user_id = %user_id, url = %url, image = dimensions.is_some(), "upload stored");

    Ok(match dimensions {
        Some((width, height)) => StoredUpload {
            img: Some(url.clone()),
            url,
            width: Some(width),
            height: Some(height),
        },
        None => StoredUpload {
            url,
            ..StoredUpload::default()
        },
    })
}
