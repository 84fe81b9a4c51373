//! 领域模型错误定义
//!
//! 定义了领域层校验失败以及存储层访问失败的错误类型。

use thiserror::Error;

/// 领域模型错误类型
///
/// `Display` 输出直接作为 `{type:"error"}` 帧的 `message` 发给客户端，
/// 因此文案面向最终用户。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 字段校验失败
    #[error("{message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },
}

impl DomainError {
    /// 创建字段校验错误
    pub fn invalid_argument(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidArgument { field, .. } => field,
        }
    }
}

/// 存储后端错误
///
/// "未找到" 在存储契约里通常以 `Ok(None)` 表达，只有显式要求目标存在的
/// 写操作才会返回 [`StorageError::NotFound`]。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    Conflict(String),
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl StorageError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
