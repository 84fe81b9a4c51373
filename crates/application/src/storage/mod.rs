//! 存储契约
//!
//! 核心只依赖 [`Storage`] trait；内存、JSON 文件与 PostgreSQL 后端可以互换。
//! "未找到" 返回 `Ok(None)` / 空列表 / `false`，不作为错误。

pub mod memory;

use async_trait::async_trait;
use domain::{
    Account, Message, NewAccount, NewMessage, PermissionGroup, Room, RoomId, RoomType,
    SignupToken, StorageError, UserEmail, UserId,
};
use serde_json::Value;

pub use memory::{MemoryStorage, StatePersistence, StorageState};

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    // ----- 生命周期 -----

    /// 打开后端并确保默认权限组存在。
    async fn start(&self) -> StorageResult<()>;

    /// 刷新并关闭后端。
    async fn exit(&self) -> StorageResult<()>;

    /// 切换到隔离的临时存储，之后的写入不会影响正式数据。
    async fn test_mode(&self) -> StorageResult<()>;

    // ----- 账户 -----

    async fn create_account(&self, account: NewAccount) -> StorageResult<Account>;
    async fn get_account(&self, id: UserId) -> StorageResult<Option<Account>>;
    async fn get_account_by_email(&self, email: &UserEmail) -> StorageResult<Option<Account>>;
    async fn get_all_accounts(&self) -> StorageResult<Vec<Account>>;
    /// 覆盖已有账户，账户不存在时返回 `NotFound`。
    async fn update_account(&self, account: Account) -> StorageResult<()>;
    async fn delete_account(&self, id: UserId) -> StorageResult<bool>;
    async fn set_account_group(&self, id: UserId, group: &str) -> StorageResult<bool>;

    async fn get_account_permission(&self, id: UserId, permission: &str) -> StorageResult<bool> {
        let Some(account) = self.get_account(id).await? else {
            return Ok(false);
        };
        Ok(self
            .get_group(&account.group)
            .await?
            .is_some_and(|group| group.has(permission)))
    }

    async fn get_account_permissions(&self, id: UserId) -> StorageResult<Vec<String>> {
        let Some(account) = self.get_account(id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .get_group(&account.group)
            .await?
            .map(|group| group.permissions.into_iter().collect())
            .unwrap_or_default())
    }

    // ----- 权限组 -----

    async fn get_groups(&self) -> StorageResult<Vec<PermissionGroup>>;
    async fn get_group(&self, name: &str) -> StorageResult<Option<PermissionGroup>>;
    /// 同名组已存在时返回 `Conflict`。
    async fn create_group(&self, group: PermissionGroup) -> StorageResult<()>;
    async fn add_group_permission(&self, group: &str, permission: &str) -> StorageResult<bool>;
    async fn remove_group_permission(&self, group: &str, permission: &str)
        -> StorageResult<bool>;
    async fn remove_group(&self, name: &str) -> StorageResult<bool>;

    // ----- 房间 -----

    async fn create_room(&self, name: &str, kind: RoomType) -> StorageResult<Room>;
    async fn get_room(&self, id: RoomId) -> StorageResult<Option<Room>>;
    async fn get_all_rooms(&self) -> StorageResult<Vec<Room>>;
    /// 删除房间以及它的全部消息。
    async fn remove_room(&self, id: RoomId) -> StorageResult<bool>;

    // ----- 消息 -----

    /// 追加消息，`idx` 由后端分配，同一房间内从 0 连续递增。
    async fn add_message(&self, room: RoomId, message: NewMessage) -> StorageResult<Message>;
    async fn get_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>>;
    /// `floor((N-1)/5)`，空房间为 0。
    async fn get_text_room_newest_segment(&self, room: RoomId) -> StorageResult<u64>;
    /// 返回 `idx` 落在 `[5s, 5s+5)` 的消息，按 `idx` 升序。
    async fn get_text_for_room(&self, room: RoomId, segment: u64) -> StorageResult<Vec<Message>>;
    async fn update_message(
        &self,
        room: RoomId,
        idx: u64,
        text: &str,
    ) -> StorageResult<Option<Message>>;
    /// 原地删除：文本替换为删除标记，作者置空，其它消息的 `idx` 不变。
    async fn remove_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>>;

    // ----- 注册邀请码 -----

    async fn generate_sign_up(&self, group: &str) -> StorageResult<SignupToken>;
    /// 只查询，不消耗。
    async fn check_sign_up(&self, token: &str) -> StorageResult<Option<String>>;
    /// 原子地消耗邀请码，返回目标组；已被使用或不存在时返回 `None`。
    async fn expend_sign_up(&self, token: &str) -> StorageResult<Option<String>>;
    /// 在一次原子操作里消耗邀请码并以它的目标组创建账户，`account.group` 被忽略。
    ///
    /// 邀请码不存在或目标组已删除时返回 `None`；邮箱冲突返回 `Conflict`，
    /// 这两种情况下邀请码都保持可用。
    async fn redeem_sign_up(
        &self,
        token: &str,
        account: NewAccount,
    ) -> StorageResult<Option<Account>>;

    // ----- 插件数据 -----

    async fn get_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<Option<Value>>;
    async fn set_plugin_data(&self, plugin: &str, key: &str, value: Value) -> StorageResult<()>;
    async fn delete_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<bool>;
}
