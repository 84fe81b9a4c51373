use serde::{Deserialize, Serialize};

/// 一次性注册邀请码，注册成功时被原子地消耗。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupToken {
    pub token: String,
    pub group: String,
}

impl SignupToken {
    pub fn generate(group: impl Into<String>) -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            group: group.into(),
        }
    }
}
