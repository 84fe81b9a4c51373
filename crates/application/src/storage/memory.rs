use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    message::{newest_segment, segment_bounds},
    Account, Message, NewAccount, NewMessage, PermissionGroup, Room, RoomId, RoomType,
    SignupToken, StorageError, UserEmail, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Storage, StorageResult};

/// 内存存储的完整状态，JSON 后端直接序列化它。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub messages: HashMap<RoomId, Vec<Message>>,
    #[serde(default)]
    pub groups: Vec<PermissionGroup>,
    #[serde(default)]
    pub signups: Vec<SignupToken>,
    #[serde(default)]
    pub plugin_data: BTreeMap<String, BTreeMap<String, Value>>,
}

impl StorageState {
    fn ensure_default_groups(&mut self) -> bool {
        if !self.groups.is_empty() {
            return false;
        }
        self.groups = PermissionGroup::defaults();
        true
    }
}

/// 把状态写到某处的持久化策略。
#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn load(&self) -> StorageResult<Option<StorageState>>;
    async fn persist(&self, state: &StorageState) -> StorageResult<()>;
}

/// 基于 `RwLock` 的内存存储。
///
/// 可选地挂一个 [`StatePersistence`]，每次变更后写出完整状态。
pub struct MemoryStorage {
    state: RwLock<StorageState>,
    persistence: Option<Arc<dyn StatePersistence>>,
    persisting: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StorageState::default()),
            persistence: None,
            persisting: AtomicBool::new(false),
        }
    }

    pub fn with_persistence(persistence: Arc<dyn StatePersistence>) -> Self {
        Self {
            state: RwLock::new(StorageState::default()),
            persistence: Some(persistence),
            persisting: AtomicBool::new(true),
        }
    }

    /// 当前状态的拷贝。
    pub async fn snapshot(&self) -> StorageState {
        self.state.read().await.clone()
    }

    async fn persist(&self, state: &StorageState) -> StorageResult<()> {
        if !self.persisting.load(Ordering::Acquire) {
            return Ok(());
        }
        match &self.persistence {
            Some(persistence) => persistence.persist(state).await,
            None => Ok(()),
        }
    }
}

fn message_log<'a>(state: &'a mut StorageState, room: RoomId) -> StorageResult<&'a mut Vec<Message>> {
    if !state.rooms.iter().any(|r| r.id == room && r.is_text()) {
        return Err(StorageError::not_found(format!("text room {room}")));
    }
    Ok(state.messages.entry(room).or_default())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn start(&self) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if let Some(persistence) = &self.persistence {
            if let Some(loaded) = persistence.load().await? {
                *state = loaded;
                info!(
                    accounts = state.accounts.len(),
                    rooms = state.rooms.len(),
                    "storage state loaded"
                );
            }
        }
        if state.ensure_default_groups() {
            info!("created default permission groups");
            self.persist(&state).await?;
        }
        Ok(())
    }

    async fn exit(&self) -> StorageResult<()> {
        let state = self.state.read().await;
        self.persist(&state).await
    }

    async fn test_mode(&self) -> StorageResult<()> {
        self.persisting.store(false, Ordering::Release);
        let mut state = self.state.write().await;
        *state = StorageState::default();
        state.ensure_default_groups();
        debug!("memory storage switched to test mode");
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> StorageResult<Account> {
        let mut state = self.state.write().await;
        if state.accounts.iter().any(|a| a.email == account.email) {
            return Err(StorageError::conflict(format!("account {}", account.email)));
        }
        let created = Account::register(
            UserId::generate(),
            account.name,
            account.email,
            account.password,
            account.group,
        );
        state.accounts.push(created.clone());
        self.persist(&state).await?;
        Ok(created)
    }

    async fn get_account(&self, id: UserId) -> StorageResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn get_account_by_email(&self, email: &UserEmail) -> StorageResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.iter().find(|a| &a.email == email).cloned())
    }

    async fn get_all_accounts(&self) -> StorageResult<Vec<Account>> {
        Ok(self.state.read().await.accounts.clone())
    }

    async fn update_account(&self, account: Account) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or_else(|| StorageError::not_found(format!("account {}", account.id)))?;
        *slot = account;
        self.persist(&state).await
    }

    async fn delete_account(&self, id: UserId) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let before = state.accounts.len();
        state.accounts.retain(|a| a.id != id);
        if state.accounts.len() == before {
            return Ok(false);
        }
        // 不级联删除消息，只断开作者引用
        for log in state.messages.values_mut() {
            for message in log.iter_mut().filter(|m| m.userid == Some(id)) {
                message.userid = None;
            }
        }
        self.persist(&state).await?;
        Ok(true)
    }

    async fn set_account_group(&self, id: UserId, group: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if !state.groups.iter().any(|g| g.name == group) {
            return Err(StorageError::not_found(format!("group {group}")));
        }
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        account.group = group.to_string();
        self.persist(&state).await?;
        Ok(true)
    }

    async fn get_groups(&self) -> StorageResult<Vec<PermissionGroup>> {
        Ok(self.state.read().await.groups.clone())
    }

    async fn get_group(&self, name: &str) -> StorageResult<Option<PermissionGroup>> {
        let state = self.state.read().await;
        Ok(state.groups.iter().find(|g| g.name == name).cloned())
    }

    async fn create_group(&self, group: PermissionGroup) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.groups.iter().any(|g| g.name == group.name) {
            return Err(StorageError::conflict(format!("group {}", group.name)));
        }
        state.groups.push(group);
        self.persist(&state).await
    }

    async fn add_group_permission(&self, group: &str, permission: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(target) = state.groups.iter_mut().find(|g| g.name == group) else {
            return Ok(false);
        };
        let changed = target.permissions.insert(permission.to_string());
        if changed {
            self.persist(&state).await?;
        }
        Ok(changed)
    }

    async fn remove_group_permission(
        &self,
        group: &str,
        permission: &str,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(target) = state.groups.iter_mut().find(|g| g.name == group) else {
            return Ok(false);
        };
        let changed = target.permissions.remove(permission);
        if changed {
            self.persist(&state).await?;
        }
        Ok(changed)
    }

    async fn remove_group(&self, name: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let before = state.groups.len();
        state.groups.retain(|g| g.name != name);
        if state.groups.len() == before {
            return Ok(false);
        }
        state.signups.retain(|s| s.group != name);
        self.persist(&state).await?;
        Ok(true)
    }

    async fn create_room(&self, name: &str, kind: RoomType) -> StorageResult<Room> {
        let mut state = self.state.write().await;
        let room = Room::new(RoomId::generate(), name, kind);
        state.rooms.push(room.clone());
        self.persist(&state).await?;
        Ok(room)
    }

    async fn get_room(&self, id: RoomId) -> StorageResult<Option<Room>> {
        let state = self.state.read().await;
        Ok(state.rooms.iter().find(|r| r.id == id).cloned())
    }

    async fn get_all_rooms(&self) -> StorageResult<Vec<Room>> {
        Ok(self.state.read().await.rooms.clone())
    }

    async fn remove_room(&self, id: RoomId) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let before = state.rooms.len();
        state.rooms.retain(|r| r.id != id);
        if state.rooms.len() == before {
            return Ok(false);
        }
        state.messages.remove(&id);
        self.persist(&state).await?;
        Ok(true)
    }

    async fn add_message(&self, room: RoomId, message: NewMessage) -> StorageResult<Message> {
        let mut state = self.state.write().await;
        let log = message_log(&mut state, room)?;
        let stored = message.into_message(room, log.len() as u64, Utc::now());
        log.push(stored.clone());
        self.persist(&state).await?;
        Ok(stored)
    }

    async fn get_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&room)
            .and_then(|log| log.get(idx as usize))
            .cloned())
    }

    async fn get_text_room_newest_segment(&self, room: RoomId) -> StorageResult<u64> {
        let state = self.state.read().await;
        let count = state.messages.get(&room).map_or(0, Vec::len);
        Ok(newest_segment(count as u64))
    }

    async fn get_text_for_room(&self, room: RoomId, segment: u64) -> StorageResult<Vec<Message>> {
        let state = self.state.read().await;
        let (start, end) = segment_bounds(segment);
        Ok(state
            .messages
            .get(&room)
            .map(|log| {
                log.iter()
                    .filter(|m| m.idx >= start && m.idx < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_message(
        &self,
        room: RoomId,
        idx: u64,
        text: &str,
    ) -> StorageResult<Option<Message>> {
        let mut state = self.state.write().await;
        let Some(message) = state
            .messages
            .get_mut(&room)
            .and_then(|log| log.get_mut(idx as usize))
        else {
            return Ok(None);
        };
        message.text = text.to_string();
        let updated = message.clone();
        self.persist(&state).await?;
        Ok(Some(updated))
    }

    async fn remove_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>> {
        let mut state = self.state.write().await;
        let Some(message) = state
            .messages
            .get_mut(&room)
            .and_then(|log| log.get_mut(idx as usize))
        else {
            return Ok(None);
        };
        message.redact();
        let removed = message.clone();
        self.persist(&state).await?;
        Ok(Some(removed))
    }

    async fn generate_sign_up(&self, group: &str) -> StorageResult<SignupToken> {
        let mut state = self.state.write().await;
        if !state.groups.iter().any(|g| g.name == group) {
            return Err(StorageError::not_found(format!("group {group}")));
        }
        let token = SignupToken::generate(group);
        state.signups.push(token.clone());
        self.persist(&state).await?;
        Ok(token)
    }

    async fn check_sign_up(&self, token: &str) -> StorageResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .signups
            .iter()
            .find(|s| s.token == token)
            .map(|s| s.group.clone()))
    }

    async fn expend_sign_up(&self, token: &str) -> StorageResult<Option<String>> {
        let mut state = self.state.write().await;
        let Some(pos) = state.signups.iter().position(|s| s.token == token) else {
            return Ok(None);
        };
        let consumed = state.signups.remove(pos);
        self.persist(&state).await?;
        Ok(Some(consumed.group))
    }

    async fn redeem_sign_up(
        &self,
        token: &str,
        account: NewAccount,
    ) -> StorageResult<Option<Account>> {
        let mut state = self.state.write().await;
        let Some(pos) = state.signups.iter().position(|s| s.token == token) else {
            return Ok(None);
        };
        let group = state.signups[pos].group.clone();
        if !state.groups.iter().any(|g| g.name == group) {
            return Ok(None);
        }
        if state.accounts.iter().any(|a| a.email == account.email) {
            return Err(StorageError::conflict(format!("account {}", account.email)));
        }
        state.signups.remove(pos);
        let created = Account::register(
            UserId::generate(),
            account.name,
            account.email,
            account.password,
            group,
        );
        state.accounts.push(created.clone());
        self.persist(&state).await?;
        Ok(Some(created))
    }

    async fn get_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<Option<Value>> {
        let state = self.state.read().await;
        Ok(state
            .plugin_data
            .get(plugin)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn set_plugin_data(&self, plugin: &str, key: &str, value: Value) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .plugin_data
            .entry(plugin.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&state).await
    }

    async fn delete_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let removed = state
            .plugin_data
            .get_mut(plugin)
            .and_then(|entries| entries.remove(key))
            .is_some();
        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }
}
