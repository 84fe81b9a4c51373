//! 服务器核心句柄
//!
//! [`ChatServer`] 把存储、事件总线、会话注册表和上下文菜单组合在一起，
//! 既是协议处理器的上下文，也是交给插件的 `serverHandle`。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{permission, Message, NewMessage, RoomId, UserId};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::{
    error::ApplicationError,
    events::{Event, EventBus, EventChannel, EventListener, Priority},
    password::PasswordHasher,
    plugin::Plugin,
    protocol::{ProtocolVersion, ServerPacket},
    session::{room_views, user_views, RoomView, SessionRegistry, UserView},
    storage::Storage,
    upload::UploadStore,
};

/// 关闭服务器时发给客户端的 WebSocket 关闭码。
const GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub name: String,
    pub description: String,
    /// 生成邀请链接用的外部地址。
    pub public_url: String,
    /// 可无限次使用的注册码，`None` 表示关闭。
    pub infinite_signup_code: Option<String>,
    pub infinite_signup_group: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "voxroom".to_string(),
            description: String::new(),
            public_url: "http://localhost:9000".to_string(),
            infinite_signup_code: None,
            infinite_signup_group: permission::USER_GROUP.to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// 插件贡献的上下文菜单项。服务器会在执行前再次检查权限。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMenuEntry {
    pub label: String,
    pub permission_required: Option<String>,
    pub option: String,
}

impl ContextMenuEntry {
    pub fn new(
        label: impl Into<String>,
        option: impl Into<String>,
        permission_required: Option<&str>,
    ) -> Self {
        Self {
            label: label.into(),
            permission_required: permission_required.map(str::to_string),
            option: option.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ContextMenu {
    entries: RwLock<Vec<ContextMenuEntry>>,
}

impl ContextMenu {
    /// 追加菜单项；同一 `option` 只保留第一次注册。
    pub async fn add(&self, entry: ContextMenuEntry) -> bool {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.option == entry.option) {
            warn!(option = %entry.option, "context menu option already registered");
            return false;
        }
        entries.push(entry);
        true
    }

    pub async fn entries(&self) -> Vec<ContextMenuEntry> {
        self.entries.read().await.clone()
    }

    pub async fn find(&self, option: &str) -> Option<ContextMenuEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.option == option)
            .cloned()
    }
}

pub struct ChatServerDependencies {
    pub storage: Arc<dyn Storage>,
    pub uploads: Arc<dyn UploadStore>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub settings: ServerSettings,
}

pub struct ChatServer {
    storage: Arc<dyn Storage>,
    events: Arc<EventBus>,
    sessions: SessionRegistry,
    context_menu: ContextMenu,
    uploads: Arc<dyn UploadStore>,
    password_hasher: Arc<dyn PasswordHasher>,
    settings: ServerSettings,
}

/// FINAL 监听器：把（可能被插件扩充过的）欢迎包发给新连接。
struct WelcomeListener;

#[async_trait]
impl EventListener for WelcomeListener {
    async fn on_event(&self, event: &mut Event) {
        if let Some(connection) = &event.connection {
            connection.send(&event.data);
        }
    }
}

impl ChatServer {
    pub fn new(deps: ChatServerDependencies) -> Arc<Self> {
        Arc::new(Self {
            storage: deps.storage,
            events: Arc::new(EventBus::init()),
            sessions: SessionRegistry::new(),
            context_menu: ContextMenu::default(),
            uploads: deps.uploads,
            password_hasher: deps.password_hasher,
            settings: deps.settings,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn context_menu(&self) -> &ContextMenu {
        &self.context_menu
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub(crate) fn uploads(&self) -> &dyn UploadStore {
        self.uploads.as_ref()
    }

    pub(crate) fn password_hasher(&self) -> &dyn PasswordHasher {
        self.password_hasher.as_ref()
    }

    /// 启动顺序：存储 → 核心监听器 → 插件（pluginprep/start/pluginstart）
    /// → serverprep → 首个管理员注册码 → serverstart。
    pub async fn start(self: &Arc<Self>, plugins: &[Arc<dyn Plugin>]) -> Result<(), ApplicationError> {
        self.storage.start().await?;
        self.events
            .listen(EventChannel::ConnectionNew, Priority::Final, Arc::new(WelcomeListener))
            .await?;

        for plugin in plugins {
            let name = plugin.name().to_string();
            let mut prep = Event::new(json!({ "plugin": name }));
            self.events.trigger(EventChannel::PluginPrep, &mut prep).await?;
            plugin.start(Arc::clone(self)).await?;
            let mut started = Event::new(json!({ "plugin": name }));
            self.events.trigger(EventChannel::PluginStart, &mut started).await?;
            info!(plugin = %name, "plugin started");
        }

        let mut prep = Event::default();
        self.events.trigger(EventChannel::ServerPrep, &mut prep).await?;

        self.bootstrap_admin_signup().await?;

        let mut started = Event::new(json!({ "serverName": self.settings.name }));
        self.events.trigger(EventChannel::ServerStart, &mut started).await?;
        info!(name = %self.settings.name, plugins = plugins.len(), "chat server started");
        Ok(())
    }

    /// 没有任何账户时生成一次性的管理员注册码。
    async fn bootstrap_admin_signup(&self) -> Result<(), ApplicationError> {
        if !self.storage.get_all_accounts().await?.is_empty() {
            return Ok(());
        }
        let token = self.storage.generate_sign_up(permission::ADMIN_GROUP).await?;
        warn!(
            signup_code = %token.token,
            url = %self.invite_url(&token.token),
            "no accounts exist yet, sign up with this code to create the first admin"
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ApplicationError> {
        let mut stopping = Event::default();
        self.events.trigger(EventChannel::ServerStop, &mut stopping).await?;
        for connection in self.sessions.snapshot().await {
            connection.close(GOING_AWAY, "Server shutting down");
        }
        self.storage.exit().await?;
        info!("chat server stopped");
        Ok(())
    }

    /// 欢迎包的初始内容，插件可以在 `connectionnew` 中追加字段。
    pub fn welcome_payload(&self) -> Value {
        let protocols: Vec<&str> = ProtocolVersion::SUPPORTED
            .iter()
            .map(ProtocolVersion::as_str)
            .collect();
        json!({
            "type": "connect",
            "protocols": protocols,
            "serverName": self.settings.name,
            "serverDescription": self.settings.description,
        })
    }

    pub fn invite_url(&self, token: &str) -> String {
        format!(
            "{}/invite/?code={}",
            self.settings.public_url.trim_end_matches('/'),
            token
        )
    }

    /// 触发通知类事件，不等待结果。
    pub fn notify(&self, channel: EventChannel, event: Event) {
        if let Err(err) = self.events.notify(channel, event) {
            error!(channel = %channel, error = %err, "notify on gating channel");
        }
    }

    pub async fn user_views(&self) -> Result<Vec<UserView>, ApplicationError> {
        let accounts = self.storage.get_all_accounts().await?;
        Ok(user_views(&accounts, &self.sessions.states().await))
    }

    pub async fn room_views(&self) -> Result<Vec<RoomView>, ApplicationError> {
        let rooms = self.storage.get_all_rooms().await?;
        Ok(room_views(&rooms, &self.sessions.states().await))
    }

    /// 向全部连接广播用户列表。
    pub async fn update_users(&self) -> Result<(), ApplicationError> {
        let user_list = self.user_views().await?;
        self.sessions
            .send_to_all(&ServerPacket::UpdateUsers { user_list }, None)
            .await;
        Ok(())
    }

    /// 向全部连接广播房间列表。
    pub async fn update_rooms(&self) -> Result<(), ApplicationError> {
        let room_list = self.room_views().await?;
        self.sessions
            .send_to_all(&ServerPacket::UpdateRooms { room_list }, None)
            .await;
        Ok(())
    }

    pub async fn send_to_all<T: Serialize + ?Sized>(&self, packet: &T) {
        self.sessions.send_to_all(packet, None).await
    }

    pub async fn send_to_id<T: Serialize + ?Sized>(&self, user_id: UserId, packet: &T) -> usize {
        self.sessions.send_to_id(user_id, packet).await
    }

    pub async fn send_to_room<T: Serialize + ?Sized>(&self, room_id: RoomId, packet: &T) {
        self.sessions.send_to_room(room_id, packet).await
    }

    /// 在用户的全部会话上弹出插件窗口。
    pub async fn present_custom_window(&self, user_id: UserId, window: Value) -> usize {
        self.sessions
            .send_to_id(user_id, &ServerPacket::CustomWindow { window })
            .await
    }

    /// 插件发布的合成消息（如 webhook），没有作者 id。
    pub async fn post_message(
        &self,
        roomid: RoomId,
        username: impl Into<String>,
        text: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<Message, ApplicationError> {
        match self.storage.get_room(roomid).await? {
            Some(room) if room.is_text() => {}
            _ => return Err(ApplicationError::rejected("Unknown text room")),
        }
        let message = self
            .storage
            .add_message(
                roomid,
                NewMessage {
                    username: username.into(),
                    text: text.into(),
                    kind: Some(kind.into()),
                    ..NewMessage::default()
                },
            )
            .await?;
        self.sessions
            .send_to_all(
                &ServerPacket::SendMessage {
                    roomid,
                    message: message.clone(),
                },
                None,
            )
            .await;
        Ok(message)
    }
}
