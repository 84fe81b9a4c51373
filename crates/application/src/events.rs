//! 事件总线
//!
//! 按优先级排序的具名频道发布/订阅机制，供插件观察、否决或修改协议动作。
//!
//! - 每个频道有五个优先级桶：EARLY → NORMAL → LATE → FINAL → MONITOR。
//! - `trigger` 严格按优先级顺序依次等待每个监听器；任一监听器把
//!   `cancelled` 置为 `true` 后立即停止，并返回 `false`。
//! - 监听器可以原地修改 `data`，后续监听器能看到修改。
//! - FINAL 保留给核心自己的"提交"监听器；MONITOR 只用于观察。
//!
//! 频道集合是封闭的 [`EventChannel`] 枚举，[`EventBus::init`] 通过
//! [`EventChannel::ALL`] 一次性注册全部频道。

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::session::Connection;

/// 事件频道
///
/// 分为两类：
/// - **gating**：结果决定后续是否执行变更，调用方必须 `await` 并检查返回值；
/// - **notification**：生命周期通知，可以通过 [`EventBus::notify`] 不等待结果地触发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventChannel {
    // 连接生命周期
    ConnectionNew,
    ConnectionClose,
    // 服务器生命周期
    ServerPrep,
    ServerStart,
    ServerStop,
    // 插件生命周期
    PluginPrep,
    PluginStart,
    // 用户生命周期
    UserCreate,
    UserAuth,
    UserFailedAuth,
    UserQuit,
    UserJoinRoom,
    UserLeaveRoom,
    UserDelete,
    UserChangeName,
    UserContextMenuCallback,
    // 房间生命周期
    RoomCreate,
    RoomDelete,
    // 消息生命周期
    MessageCreate,
    MessageSend,
    MessageChange,
}

impl EventChannel {
    pub const ALL: [EventChannel; 21] = [
        EventChannel::ConnectionNew,
        EventChannel::ConnectionClose,
        EventChannel::ServerPrep,
        EventChannel::ServerStart,
        EventChannel::ServerStop,
        EventChannel::PluginPrep,
        EventChannel::PluginStart,
        EventChannel::UserCreate,
        EventChannel::UserAuth,
        EventChannel::UserFailedAuth,
        EventChannel::UserQuit,
        EventChannel::UserJoinRoom,
        EventChannel::UserLeaveRoom,
        EventChannel::UserDelete,
        EventChannel::UserChangeName,
        EventChannel::UserContextMenuCallback,
        EventChannel::RoomCreate,
        EventChannel::RoomDelete,
        EventChannel::MessageCreate,
        EventChannel::MessageSend,
        EventChannel::MessageChange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventChannel::ConnectionNew => "connectionnew",
            EventChannel::ConnectionClose => "connectionclose",
            EventChannel::ServerPrep => "serverprep",
            EventChannel::ServerStart => "serverstart",
            EventChannel::ServerStop => "serverstop",
            EventChannel::PluginPrep => "pluginprep",
            EventChannel::PluginStart => "pluginstart",
            EventChannel::UserCreate => "usercreate",
            EventChannel::UserAuth => "userauth",
            EventChannel::UserFailedAuth => "userfailedauth",
            EventChannel::UserQuit => "userquit",
            EventChannel::UserJoinRoom => "userjoinroom",
            EventChannel::UserLeaveRoom => "userleaveroom",
            EventChannel::UserDelete => "userdelete",
            EventChannel::UserChangeName => "userchangename",
            EventChannel::UserContextMenuCallback => "usercontextmenucallback",
            EventChannel::RoomCreate => "roomcreate",
            EventChannel::RoomDelete => "roomdelete",
            EventChannel::MessageCreate => "messagecreate",
            EventChannel::MessageSend => "messagesend",
            EventChannel::MessageChange => "messagechange",
        }
    }

    /// 通知类频道的结果不控制任何变更，允许不等待地触发。
    pub fn is_notification(&self) -> bool {
        match self {
            EventChannel::ConnectionClose
            | EventChannel::ServerPrep
            | EventChannel::ServerStart
            | EventChannel::ServerStop
            | EventChannel::PluginPrep
            | EventChannel::PluginStart
            | EventChannel::UserFailedAuth
            | EventChannel::UserQuit
            | EventChannel::UserJoinRoom
            | EventChannel::UserLeaveRoom
            | EventChannel::UserChangeName
            | EventChannel::UserContextMenuCallback => true,
            EventChannel::ConnectionNew
            | EventChannel::UserCreate
            | EventChannel::UserAuth
            | EventChannel::UserDelete
            | EventChannel::RoomCreate
            | EventChannel::RoomDelete
            | EventChannel::MessageCreate
            | EventChannel::MessageSend
            | EventChannel::MessageChange => false,
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 监听器优先级，数值越小越先执行。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Early = 1,
    Normal = 2,
    Late = 3,
    Final = 4,
    Monitor = 5,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Early,
        Priority::Normal,
        Priority::Late,
        Priority::Final,
        Priority::Monitor,
    ];

    fn bucket(self) -> usize {
        self as usize - 1
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event channel \"{0}\" was never registered")]
    UnregisteredChannel(EventChannel),
    #[error("event channel \"{0}\" gates a mutation and must be awaited")]
    NotANotification(EventChannel),
}

/// 传给监听器的事件负载。
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// 由 `trigger` 设置为当前频道。
    pub event_type: Option<EventChannel>,
    /// 由 `trigger` 重置为 `false`；监听器置为 `true` 即否决。
    pub cancelled: bool,
    pub data: Map<String, Value>,
    /// 触发该事件的连接（如果有）。
    pub connection: Option<Arc<Connection>>,
}

impl Event {
    pub fn new(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_connection(mut self, connection: Arc<Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// 取消并附带原因，协议层会把原因作为错误文案回复给客户端。
    pub fn cancel_with_reason(&mut self, reason: impl Into<String>) {
        self.set("reason", reason.into());
        self.cancelled = true;
    }

    pub fn reason(&self) -> Option<&str> {
        self.get_str("reason")
    }
}

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &mut Event);
}

/// 把同步闭包包装成监听器。
struct FnListener<F>(F);

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&mut Event) + Send + Sync,
{
    async fn on_event(&self, event: &mut Event) {
        (self.0)(event)
    }
}

type Buckets = [Vec<Arc<dyn EventListener>>; 5];

pub struct EventBus {
    channels: RwLock<HashMap<EventChannel, Buckets>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// 创建空总线，任何频道都需要先 [`register`](Self::register)。
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 创建并注册全部已知频道。
    pub fn init() -> Self {
        let channels = EventChannel::ALL
            .iter()
            .map(|channel| (*channel, Buckets::default()))
            .collect();
        Self {
            channels: RwLock::new(channels),
        }
    }

    /// 声明频道。重复注册不会重置已有监听器，只记录警告。
    pub async fn register(&self, channel: EventChannel) {
        let mut channels = self.channels.write().await;
        if channels.contains_key(&channel) {
            warn!(channel = %channel, "event channel already registered");
            return;
        }
        channels.insert(channel, Buckets::default());
        debug!(channel = %channel, "event channel registered");
    }

    pub async fn is_registered(&self, channel: EventChannel) -> bool {
        self.channels.read().await.contains_key(&channel)
    }

    pub async fn listen(
        &self,
        channel: EventChannel,
        priority: Priority,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), EventError> {
        let mut channels = self.channels.write().await;
        let buckets = channels
            .get_mut(&channel)
            .ok_or(EventError::UnregisteredChannel(channel))?;
        buckets[priority.bucket()].push(listener);
        Ok(())
    }

    pub async fn listen_fn<F>(
        &self,
        channel: EventChannel,
        priority: Priority,
        callback: F,
    ) -> Result<(), EventError>
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        self.listen(channel, priority, Arc::new(FnListener(callback)))
            .await
    }

    /// 依次运行全部优先级的监听器，返回事件是否被允许。
    pub async fn trigger(&self, channel: EventChannel, event: &mut Event) -> Result<bool, EventError> {
        self.trigger_through(channel, event, Priority::Monitor).await
    }

    /// 只运行到 `last`（含）为止的优先级。
    ///
    /// 携带凭据的事件（`usercreate`、`userauth`）只运行到 LATE，
    /// FINAL/MONITOR 监听器永远看不到这些数据。
    pub async fn trigger_through(
        &self,
        channel: EventChannel,
        event: &mut Event,
        last: Priority,
    ) -> Result<bool, EventError> {
        let buckets = {
            let channels = self.channels.read().await;
            channels
                .get(&channel)
                .cloned()
                .ok_or(EventError::UnregisteredChannel(channel))?
        };

        event.cancelled = false;
        event.event_type = Some(channel);

        for priority in Priority::ALL.into_iter().filter(|p| *p <= last) {
            for listener in &buckets[priority.bucket()] {
                listener.on_event(event).await;
                if event.cancelled {
                    debug!(channel = %channel, ?priority, "event cancelled");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// 不等待结果地触发通知类频道，监听器在后台任务中按顺序执行。
    pub fn notify(self: &Arc<Self>, channel: EventChannel, event: Event) -> Result<(), EventError> {
        if !channel.is_notification() {
            return Err(EventError::NotANotification(channel));
        }

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut event = event;
            if let Err(err) = bus.trigger(channel, &mut event).await {
                error!(channel = %channel, error = %err, "notification trigger failed");
            }
        });
        Ok(())
    }
}
