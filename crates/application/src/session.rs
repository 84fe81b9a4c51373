//! 会话注册表与广播
//!
//! 每个 WebSocket 对应一个 [`Connection`]。传输层持有 `mpsc` 的接收端，
//! 协议层只通过 [`Connection::send`] / [`Connection::close`] 向外写帧。
//!
//! 注册表只保存已经认证的连接；在线状态不落库，每次广播时扫描
//! 连接列表合并到账户与房间视图上。

use std::sync::Arc;

use domain::{Account, Room, RoomId, RoomType, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};
use uuid::Uuid;

use crate::protocol::ProtocolVersion;

/// 发往传输层的指令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// 连接上可变的会话状态。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub protocol: ProtocolVersion,
    pub user_id: Option<UserId>,
    pub user_name: Option<String>,
    /// 当前所在的语音房间。
    pub current_room: Option<RoomId>,
    pub live_state: bool,
    pub live_label: Option<String>,
    pub talking: bool,
    pub suppressed: bool,
}

impl ConnectionState {
    /// 离开语音房间时清空的房间内状态。
    pub fn leave_room(&mut self) {
        self.current_room = None;
        self.talking = false;
        self.live_state = false;
        self.live_label = None;
    }
}

pub struct Connection {
    id: Uuid,
    sender: mpsc::UnboundedSender<Outbound>,
    state: RwLock<ConnectionState>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

impl Connection {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sender,
            state: RwLock::new(ConnectionState::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 当前状态的拷贝。
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// 在写锁内修改状态并返回闭包结果。
    pub async fn update<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.state.read().await.user_id
    }

    pub async fn protocol(&self) -> ProtocolVersion {
        self.state.read().await.protocol
    }

    /// 序列化并发送一帧。连接已关闭时静默丢弃。
    pub fn send<T: Serialize + ?Sized>(&self, packet: &T) -> bool {
        match serde_json::to_string(packet) {
            Ok(text) => self.sender.send(Outbound::Text(text)).is_ok(),
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "failed to encode packet");
                false
            }
        }
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(connection_id = %self.id, code, reason = %reason, "closing connection");
        let _ = self.sender.send(Outbound::Close { code, reason });
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// 已认证连接的列表。
#[derive(Default)]
pub struct SessionRegistry {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 认证成功时加入；重复加入同一连接无效果。
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.write().await;
        if connections.iter().any(|c| c.id() == connection.id()) {
            return;
        }
        connections.push(connection);
    }

    /// 移除连接；从未认证过的连接返回 `None`。
    pub async fn remove(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        let pos = connections.iter().position(|c| c.id() == connection_id)?;
        Some(connections.remove(pos))
    }

    pub async fn contains(&self, connection_id: Uuid) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|c| c.id() == connection_id)
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn connections_for_user(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        let mut matched = Vec::new();
        for connection in self.snapshot().await {
            if connection.user_id().await == Some(user_id) {
                matched.push(connection);
            }
        }
        matched
    }

    /// 发给全部连接，可排除发起者。
    pub async fn send_to_all<T: Serialize + ?Sized>(&self, packet: &T, except: Option<Uuid>) {
        for connection in self.snapshot().await {
            if Some(connection.id()) == except {
                continue;
            }
            connection.send(packet);
        }
    }

    /// 发给某个用户的全部会话；用户不在线时什么也不做。
    pub async fn send_to_id<T: Serialize + ?Sized>(&self, user_id: UserId, packet: &T) -> usize {
        let targets = self.connections_for_user(user_id).await;
        for connection in &targets {
            connection.send(packet);
        }
        targets.len()
    }

    /// 发给当前在某个语音房间里的连接。
    pub async fn send_to_room<T: Serialize + ?Sized>(&self, room_id: RoomId, packet: &T) {
        for connection in self.snapshot().await {
            if connection.state().await.current_room == Some(room_id) {
                connection.send(packet);
            }
        }
    }

    /// 所有连接状态的一次快照，用于生成视图。
    pub async fn states(&self) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        for connection in self.snapshot().await {
            states.push(connection.state().await);
        }
        states
    }
}

/// `updateUsers` 中的单个用户：账户加在线状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub group: String,
    pub hidden: bool,
    pub avatar: String,
    pub online: bool,
    pub talking: bool,
    pub suppressed: bool,
    pub live_state: bool,
    pub live_label: Option<String>,
}

/// 语音房间里的一个成员。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberView {
    pub userid: UserId,
    pub name: String,
    pub talking: bool,
    pub suppressed: bool,
    pub live_state: bool,
    pub live_label: Option<String>,
}

/// `updateRooms` 中的单个房间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomType,
    pub userlist: Vec<RoomMemberView>,
}

/// 把账户与连接状态合并为用户视图，同一用户多会话时任一会话的状态生效。
pub fn user_views(accounts: &[Account], states: &[ConnectionState]) -> Vec<UserView> {
    accounts
        .iter()
        .map(|account| {
            let sessions: Vec<_> = states
                .iter()
                .filter(|s| s.user_id == Some(account.id))
                .collect();
            let live = sessions.iter().find(|s| s.live_state);
            UserView {
                id: account.id,
                name: account.name.clone(),
                group: account.group.clone(),
                hidden: account.hidden,
                avatar: account.avatar_or_default(),
                online: !sessions.is_empty(),
                talking: sessions.iter().any(|s| s.talking),
                suppressed: sessions.iter().any(|s| s.suppressed),
                live_state: live.is_some(),
                live_label: live.and_then(|s| s.live_label.clone()),
            }
        })
        .collect()
}

pub fn room_views(rooms: &[Room], states: &[ConnectionState]) -> Vec<RoomView> {
    rooms
        .iter()
        .map(|room| RoomView {
            id: room.id,
            name: room.name.clone(),
            kind: room.kind,
            userlist: states
                .iter()
                .filter(|s| s.current_room == Some(room.id))
                .filter_map(|s| {
                    Some(RoomMemberView {
                        userid: s.user_id?,
                        name: s.user_name.clone().unwrap_or_default(),
                        talking: s.talking,
                        suppressed: s.suppressed,
                        live_state: s.live_state,
                        live_label: s.live_label.clone(),
                    })
                })
                .collect(),
        })
        .collect()
}
