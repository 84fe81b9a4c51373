use domain::{DomainError, StorageError};
use thiserror::Error;

use crate::{events::EventError, password::PasswordHasherError, upload::UploadError};

/// 协议级致命错误使用的 WebSocket 关闭码。
pub const PROTOCOL_CLOSE_CODE: u16 = 3001;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("{0}")]
    Upload(#[from] UploadError),
    #[error("event bus error: {0}")]
    Event(#[from] EventError),
    /// 权限校验失败，不产生任何副作用。
    #[error("Permission denied \"{0}\"")]
    PermissionDenied(String),
    /// 被拒绝的操作（校验失败、插件否决等），连接保持打开。
    #[error("{0}")]
    Rejected(String),
    /// 对连接致命：回复错误后以 `code` 关闭。
    #[error("{reason}")]
    Fatal { code: u16, reason: String },
}

impl ApplicationError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// 以 3001 关闭连接的协议错误
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            code: PROTOCOL_CLOSE_CODE,
            reason: reason.into(),
        }
    }

    pub fn permission_denied(permission: impl Into<String>) -> Self {
        Self::PermissionDenied(permission.into())
    }

    /// 需要关闭连接时返回关闭码。
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Fatal { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否属于服务端内部故障（需要记录日志，客户端只看到通用提示）。
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Password(_) | Self::Event(_) => true,
            Self::Upload(err) => err.is_internal(),
            Self::Domain(_) | Self::PermissionDenied(_) | Self::Rejected(_) | Self::Fatal { .. } => {
                false
            }
        }
    }

    /// 写入 `{type:"error"}` 帧的文案。
    pub fn client_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}
