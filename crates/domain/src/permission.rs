//! 权限组与权限名称
//!
//! 权限是扁平的字符串集合，没有继承关系；每个账户恰好属于一个组。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub const CREATE_ROOM: &str = "createRoom";
pub const REMOVE_ROOM: &str = "removeRoom";
pub const CREATE_USER: &str = "createUser";
pub const RENAME_USER: &str = "renameUser";
pub const REMOVE_USER: &str = "removeUser";
pub const CHANGE_MESSAGE: &str = "changeMessage";
pub const SET_USER_GROUP: &str = "setUserGroup";
pub const INVITE_USER_ANY: &str = "inviteUserAny";
pub const SUPPRESS_USER: &str = "suppressUser";
pub const SET_GROUP_PERM: &str = "setGroupPerm";

/// 核心协议使用的全部权限，默认 `admin` 组拥有其全部。
pub const ALL: [&str; 10] = [
    CREATE_ROOM,
    REMOVE_ROOM,
    CREATE_USER,
    RENAME_USER,
    REMOVE_USER,
    CHANGE_MESSAGE,
    SET_USER_GROUP,
    INVITE_USER_ANY,
    SUPPRESS_USER,
    SET_GROUP_PERM,
];

pub const ADMIN_GROUP: &str = "admin";
pub const USER_GROUP: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub name: String,
    pub permissions: BTreeSet<String>,
}

impl PermissionGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permissions<I, S>(name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// 首次启动时创建的默认组。
    pub fn defaults() -> Vec<PermissionGroup> {
        vec![
            PermissionGroup::with_permissions(ADMIN_GROUP, ALL),
            PermissionGroup::new(USER_GROUP),
        ]
    }
}
