use serde::{Deserialize, Serialize};

use crate::value_objects::{PasswordHash, UserEmail, UserId, Username};

/// 未设置头像时客户端使用的默认头像。
pub const DEFAULT_AVATAR: &str = "/img/default_avatar.png";

/// 持久化的账户。
///
/// 账户本身不含任何在线状态，在线状态在广播时由会话注册表合并。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub name: String,
    pub email: UserEmail,
    /// 只用于持久化，客户端看到的是不含密码的用户视图。
    pub password: PasswordHash,
    pub group: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Account {
    pub fn register(
        id: UserId,
        name: Username,
        email: UserEmail,
        password: PasswordHash,
        group: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into_inner(),
            email,
            password,
            group: group.into(),
            hidden: false,
            avatar: None,
        }
    }

    pub fn rename(&mut self, name: Username) {
        self.name = name.into_inner();
    }

    pub fn avatar_or_default(&self) -> String {
        self.avatar
            .clone()
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string())
    }
}

/// 创建账户时传给存储层的参数，密码已经哈希。
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: Username,
    pub email: UserEmail,
    pub password: PasswordHash,
    pub group: String,
}
