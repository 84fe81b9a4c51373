//! PostgreSQL 存储后端
//!
//! 表结构见仓库根目录的 `migrations/`。消息序号由 `rooms.next_idx`
//! 在事务中原子地分配；`test_mode` 切换到独立的 `voxroom_test` schema。

use std::str::FromStr;

use application::{Storage, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    message::{newest_segment, segment_bounds},
    Account, Message, NewAccount,
    NewMessage, PasswordHash, PermissionGroup, Room, RoomId, RoomType, SignupToken, StorageError,
    UserEmail, UserId, REMOVED_MESSAGE_TEXT,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, Executor, FromRow, PgPool};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::migrations::MIGRATOR;

const TEST_SCHEMA: &str = "voxroom_test";

fn map_sqlx_err(err: sqlx::Error) -> StorageError {
    StorageError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> StorageError {
    StorageError::storage(message)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// 超出 BIGINT 的序号不可能存在。
fn db_idx(idx: u64) -> Option<i64> {
    i64::try_from(idx).ok()
}

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    group_name: String,
    hidden: bool,
    avatar: Option<String>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = StorageError;

    fn try_from(value: AccountRecord) -> Result<Self, Self::Error> {
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password =
            PasswordHash::new(value.password_hash).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Account {
            id: UserId::from(value.id),
            name: value.name,
            email,
            password,
            group: value.group_name,
            hidden: value.hidden,
            avatar: value.avatar,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
    kind: String,
}

impl TryFrom<RoomRecord> for Room {
    type Error = StorageError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let kind = RoomType::from_str(&value.kind).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Room::new(RoomId::from(value.id), value.name, kind))
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    room_id: Uuid,
    idx: i64,
    user_id: Option<Uuid>,
    username: String,
    text: String,
    tags: Vec<Uuid>,
    url: Option<String>,
    img: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    kind: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = StorageError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let idx = u64::try_from(value.idx)
            .map_err(|_| invalid_data(format!("negative message index {}", value.idx)))?;

        Ok(Message {
            roomid: RoomId::from(value.room_id),
            idx,
            userid: value.user_id.map(UserId::from),
            username: value.username,
            text: value.text,
            tags: value.tags.into_iter().map(UserId::from).collect(),
            url: value.url,
            img: value.img,
            width: value.width.and_then(|w| u32::try_from(w).ok()),
            height: value.height.and_then(|h| u32::try_from(h).ok()),
            kind: value.kind,
            time: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupRecord {
    name: String,
    permissions: Vec<String>,
}

impl From<GroupRecord> for PermissionGroup {
    fn from(value: GroupRecord) -> Self {
        PermissionGroup::with_permissions(value.name, value.permissions)
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, group_name, hidden, avatar";
const MESSAGE_COLUMNS: &str =
    "room_id, idx, user_id, username, text, tags, url, img, width, height, kind, created_at";
const GROUP_SELECT: &str = "SELECT g.name, \
     COALESCE(array_agg(p.permission ORDER BY p.permission) FILTER (WHERE p.permission IS NOT NULL), '{}') AS permissions \
     FROM permission_groups g LEFT JOIN group_permissions p ON p.group_name = g.name";

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub struct PgStorage {
    pool: RwLock<PgPool>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: RwLock::new(pool),
        }
    }

    async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    async fn ensure_default_groups(&self, pool: &PgPool) -> StorageResult<()> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM permission_groups")
            .fetch_one(pool)
            .await
            .map_err(map_sqlx_err)?;
        if count > 0 {
            return Ok(());
        }
        for group in PermissionGroup::defaults() {
            insert_group(pool, &group).await?;
        }
        info!("created default permission groups");
        Ok(())
    }

    async fn group_exists(pool: &PgPool, name: &str) -> StorageResult<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM permission_groups WHERE name = $1")
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(found.is_some())
    }
}

async fn insert_group(pool: &PgPool, group: &PermissionGroup) -> StorageResult<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_err)?;
    sqlx::query("INSERT INTO permission_groups (name) VALUES ($1)")
        .bind(&group.name)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict(format!("group {}", group.name))
            } else {
                map_sqlx_err(err)
            }
        })?;
    let permissions: Vec<String> = group.permissions.iter().cloned().collect();
    sqlx::query(
        "INSERT INTO group_permissions (group_name, permission) SELECT $1, UNNEST($2::text[])",
    )
    .bind(&group.name)
    .bind(&permissions)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_err)?;
    tx.commit().await.map_err(map_sqlx_err)
}

#[async_trait]
impl Storage for PgStorage {
    async fn start(&self) -> StorageResult<()> {
        let pool = self.pool().await;
        self.ensure_default_groups(&pool).await
    }

    async fn exit(&self) -> StorageResult<()> {
        self.pool().await.close().await;
        debug!("postgres pool closed");
        Ok(())
    }

    async fn test_mode(&self) -> StorageResult<()> {
        let current = self.pool().await;
        current
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {TEST_SCHEMA}").as_str())
            .await
            .map_err(map_sqlx_err)?;

        let options = current.connect_options().as_ref().clone();
        let test_pool = PgPoolOptions::new()
            .max_connections(current.options().get_max_connections())
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET search_path TO {TEST_SCHEMA}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(map_sqlx_err)?;

        MIGRATOR
            .run(&test_pool)
            .await
            .map_err(|err| StorageError::storage(err.to_string()))?;
        test_pool
            .execute(
                "TRUNCATE messages, rooms, accounts, group_permissions, permission_groups, \
                 signup_tokens, plugin_data",
            )
            .await
            .map_err(map_sqlx_err)?;
        self.ensure_default_groups(&test_pool).await?;

        let previous = std::mem::replace(&mut *self.pool.write().await, test_pool);
        previous.close().await;
        info!(schema = TEST_SCHEMA, "postgres storage switched to test mode");
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> StorageResult<Account> {
        let pool = self.pool().await;
        let created = Account::register(
            UserId::generate(),
            account.name,
            account.email,
            account.password,
            account.group,
        );
        sqlx::query(
            "INSERT INTO accounts (id, name, email, password_hash, group_name, hidden, avatar) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::from(created.id))
        .bind(&created.name)
        .bind(created.email.as_str())
        .bind(created.password.as_str())
        .bind(&created.group)
        .bind(created.hidden)
        .bind(&created.avatar)
        .execute(&pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict(format!("account {}", created.email))
            } else {
                map_sqlx_err(err)
            }
        })?;
        Ok(created)
    }

    async fn get_account(&self, id: UserId) -> StorageResult<Option<Account>> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Account::try_from).transpose()
    }

    async fn get_account_by_email(&self, email: &UserEmail) -> StorageResult<Option<Account>> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Account::try_from).transpose()
    }

    async fn get_all_accounts(&self) -> StorageResult<Vec<Account>> {
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Account::try_from).collect()
    }

    async fn update_account(&self, account: Account) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET name = $2, email = $3, password_hash = $4, group_name = $5, \
             hidden = $6, avatar = $7 WHERE id = $1",
        )
        .bind(Uuid::from(account.id))
        .bind(&account.name)
        .bind(account.email.as_str())
        .bind(account.password.as_str())
        .bind(&account.group)
        .bind(account.hidden)
        .bind(&account.avatar)
        .execute(&self.pool().await)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict(format!("account {}", account.email))
            } else {
                map_sqlx_err(err)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("account {}", account.id)));
        }
        Ok(())
    }

    async fn delete_account(&self, id: UserId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_account_group(&self, id: UserId, group: &str) -> StorageResult<bool> {
        let pool = self.pool().await;
        if !Self::group_exists(&pool, group).await? {
            return Err(StorageError::not_found(format!("group {group}")));
        }
        let result = sqlx::query("UPDATE accounts SET group_name = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(group)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_groups(&self) -> StorageResult<Vec<PermissionGroup>> {
        let records = sqlx::query_as::<_, GroupRecord>(&format!(
            "{GROUP_SELECT} GROUP BY g.name, g.created_at ORDER BY g.created_at, g.name"
        ))
        .fetch_all(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(PermissionGroup::from).collect())
    }

    async fn get_group(&self, name: &str) -> StorageResult<Option<PermissionGroup>> {
        let record = sqlx::query_as::<_, GroupRecord>(&format!(
            "{GROUP_SELECT} WHERE g.name = $1 GROUP BY g.name"
        ))
        .bind(name)
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(PermissionGroup::from))
    }

    async fn create_group(&self, group: PermissionGroup) -> StorageResult<()> {
        insert_group(&self.pool().await, &group).await
    }

    async fn add_group_permission(&self, group: &str, permission: &str) -> StorageResult<bool> {
        let pool = self.pool().await;
        if !Self::group_exists(&pool, group).await? {
            return Ok(false);
        }
        let result = sqlx::query(
            "INSERT INTO group_permissions (group_name, permission) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(group)
        .bind(permission)
        .execute(&pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_group_permission(
        &self,
        group: &str,
        permission: &str,
    ) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM group_permissions WHERE group_name = $1 AND permission = $2")
                .bind(group)
                .bind(permission)
                .execute(&self.pool().await)
                .await
                .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_group(&self, name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM permission_groups WHERE name = $1")
            .bind(name)
            .execute(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_room(&self, name: &str, kind: RoomType) -> StorageResult<Room> {
        let room = Room::new(RoomId::generate(), name, kind);
        sqlx::query("INSERT INTO rooms (id, name, kind) VALUES ($1, $2, $3)")
            .bind(Uuid::from(room.id))
            .bind(&room.name)
            .bind(room.kind.as_str())
            .execute(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn get_room(&self, id: RoomId) -> StorageResult<Option<Room>> {
        let record =
            sqlx::query_as::<_, RoomRecord>("SELECT id, name, kind FROM rooms WHERE id = $1")
                .bind(Uuid::from(id))
                .fetch_optional(&self.pool().await)
                .await
                .map_err(map_sqlx_err)?;
        record.map(Room::try_from).transpose()
    }

    async fn get_all_rooms(&self) -> StorageResult<Vec<Room>> {
        let records = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, name, kind FROM rooms ORDER BY created_at, id",
        )
        .fetch_all(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Room::try_from).collect()
    }

    async fn remove_room(&self, id: RoomId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_message(&self, room: RoomId, message: NewMessage) -> StorageResult<Message> {
        let pool = self.pool().await;
        let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

        let allocated: Option<(i64,)> = sqlx::query_as(
            "UPDATE rooms SET next_idx = next_idx + 1 WHERE id = $1 AND kind = 'text' \
             RETURNING next_idx - 1",
        )
        .bind(Uuid::from(room))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let Some((idx,)) = allocated else {
            return Err(StorageError::not_found(format!("text room {room}")));
        };

        let tags: Vec<Uuid> = message.tags.iter().copied().map(Uuid::from).collect();
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages (room_id, idx, user_id, username, text, tags, url, img, width, height, kind) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(room))
        .bind(idx)
        .bind(message.userid.map(Uuid::from))
        .bind(&message.username)
        .bind(&message.text)
        .bind(&tags)
        .bind(&message.url)
        .bind(&message.img)
        .bind(message.width.and_then(|w| i32::try_from(w).ok()))
        .bind(message.height.and_then(|h| i32::try_from(h).ok()))
        .bind(&message.kind)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn get_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>> {
        let Some(idx) = db_idx(idx) else {
            return Ok(None);
        };
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = $1 AND idx = $2"
        ))
        .bind(Uuid::from(room))
        .bind(idx)
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn get_text_room_newest_segment(&self, room: RoomId) -> StorageResult<u64> {
        let count: Option<(i64,)> = sqlx::query_as("SELECT next_idx FROM rooms WHERE id = $1")
            .bind(Uuid::from(room))
            .fetch_optional(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        let count = count.map_or(0, |(n,)| u64::try_from(n).unwrap_or(0));
        Ok(newest_segment(count))
    }

    async fn get_text_for_room(&self, room: RoomId, segment: u64) -> StorageResult<Vec<Message>> {
        let (start, end) = segment_bounds(segment);
        let (Some(start), Some(end)) = (db_idx(start), db_idx(end)) else {
            return Ok(Vec::new());
        };
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE room_id = $1 AND idx >= $2 AND idx < $3 ORDER BY idx"
        ))
        .bind(Uuid::from(room))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }

    async fn update_message(
        &self,
        room: RoomId,
        idx: u64,
        text: &str,
    ) -> StorageResult<Option<Message>> {
        let Some(idx) = db_idx(idx) else {
            return Ok(None);
        };
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET text = $3 WHERE room_id = $1 AND idx = $2 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(room))
        .bind(idx)
        .bind(text)
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn remove_message(&self, room: RoomId, idx: u64) -> StorageResult<Option<Message>> {
        let Some(idx) = db_idx(idx) else {
            return Ok(None);
        };
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET text = $3, user_id = NULL, tags = '{{}}', url = NULL, img = NULL, \
             width = NULL, height = NULL WHERE room_id = $1 AND idx = $2 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(room))
        .bind(idx)
        .bind(REMOVED_MESSAGE_TEXT)
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn generate_sign_up(&self, group: &str) -> StorageResult<SignupToken> {
        let pool = self.pool().await;
        if !Self::group_exists(&pool, group).await? {
            return Err(StorageError::not_found(format!("group {group}")));
        }
        let token = SignupToken::generate(group);
        sqlx::query("INSERT INTO signup_tokens (token, group_name) VALUES ($1, $2)")
            .bind(&token.token)
            .bind(&token.group)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(token)
    }

    async fn check_sign_up(&self, token: &str) -> StorageResult<Option<String>> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT group_name FROM signup_tokens WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool().await)
                .await
                .map_err(map_sqlx_err)?;
        Ok(found.map(|(group,)| group))
    }

    async fn expend_sign_up(&self, token: &str) -> StorageResult<Option<String>> {
        let consumed: Option<(String,)> =
            sqlx::query_as("DELETE FROM signup_tokens WHERE token = $1 RETURNING group_name")
                .bind(token)
                .fetch_optional(&self.pool().await)
                .await
                .map_err(map_sqlx_err)?;
        Ok(consumed.map(|(group,)| group))
    }

    async fn redeem_sign_up(
        &self,
        token: &str,
        account: NewAccount,
    ) -> StorageResult<Option<Account>> {
        let pool = self.pool().await;
        let mut tx = pool.begin().await.map_err(map_sqlx_err)?;
        // 邀请码的外键保证目标组存在；插入失败时事务回滚，邀请码保留
        let consumed: Option<(String,)> =
            sqlx::query_as("DELETE FROM signup_tokens WHERE token = $1 RETURNING group_name")
                .bind(token)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        let Some((group,)) = consumed else {
            return Ok(None);
        };

        let created = Account::register(
            UserId::generate(),
            account.name,
            account.email,
            account.password,
            group,
        );
        sqlx::query(
            "INSERT INTO accounts (id, name, email, password_hash, group_name, hidden, avatar) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::from(created.id))
        .bind(&created.name)
        .bind(created.email.as_str())
        .bind(created.password.as_str())
        .bind(&created.group)
        .bind(created.hidden)
        .bind(&created.avatar)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict(format!("account {}", created.email))
            } else {
                map_sqlx_err(err)
            }
        })?;

        tx.commit().await.map_err(map_sqlx_err)?;
        debug!(user_id = %created.id, group = %created.group, "signup token redeemed");
        Ok(Some(created))
    }

    async fn get_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<Option<Value>> {
        let found: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT value FROM plugin_data WHERE plugin = $1 AND key = $2")
                .bind(plugin)
                .bind(key)
                .fetch_optional(&self.pool().await)
                .await
                .map_err(map_sqlx_err)?;
        Ok(found.map(|(Json(value),)| value))
    }

    async fn set_plugin_data(&self, plugin: &str, key: &str, value: Value) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO plugin_data (plugin, key, value) VALUES ($1, $2, $3) \
             ON CONFLICT (plugin, key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(plugin)
        .bind(key)
        .bind(Json(value))
        .execute(&self.pool().await)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_plugin_data(&self, plugin: &str, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM plugin_data WHERE plugin = $1 AND key = $2")
            .bind(plugin)
            .bind(key)
            .execute(&self.pool().await)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

