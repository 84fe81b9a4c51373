//! 连接协议状态机
//!
//! 每个连接从 `v0`（认证前）开始，成功 `login` 后恰好一次切换到 `v1`。
//! 入站帧先做 JSON 解码，再按连接当前的协议版本分发到 [`v0`] / [`v1`]。
//!
//! 错误映射：
//! - JSON 无法解析：直接以 3001 关闭，不进入分发；
//! - [`ApplicationError::Fatal`]：回复错误后以携带的关闭码关闭；
//! - 其它错误：回复 `{type:"error"}`，连接保持打开。

pub mod packets;
pub mod v0;
pub mod v1;

use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ApplicationError, PROTOCOL_CLOSE_CODE},
    events::{Event, EventChannel},
    server::ChatServer,
    session::Connection,
};

pub use packets::{ServerPacket, V0Packet, V1Packet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    #[default]
    V0,
    V1,
}

impl ProtocolVersion {
    /// 客户端可以通过 `login` 请求的协议版本。
    pub const SUPPORTED: [ProtocolVersion; 1] = [ProtocolVersion::V1];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V0 => "v0",
            ProtocolVersion::V1 => "v1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "v0" => Some(ProtocolVersion::V0),
            "v1" => Some(ProtocolVersion::V1),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 新连接建立：触发 `connectionnew`，欢迎包由核心的 FINAL 监听器发送。
pub async fn handle_open(server: &Arc<ChatServer>, connection: &Arc<Connection>) {
    let mut event = Event::new(server.welcome_payload()).with_connection(connection.clone());
    match server
        .events()
        .trigger(EventChannel::ConnectionNew, &mut event)
        .await
    {
        Ok(true) => debug!(connection_id = %connection.id(), "connection opened"),
        Ok(false) => {
            info!(connection_id = %connection.id(), "connection refused by listener");
            connection.close(PROTOCOL_CLOSE_CODE, "Connection refused");
        }
        Err(err) => {
            error!(connection_id = %connection.id(), error = %err, "connectionnew trigger failed");
            connection.close(PROTOCOL_CLOSE_CODE, "Connection refused");
        }
    }
}

/// 处理一帧文本。
pub async fn handle_frame(server: &Arc<ChatServer>, connection: &Arc<Connection>, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            debug!(connection_id = %connection.id(), error = %err, "malformed json frame");
            connection.close(PROTOCOL_CLOSE_CODE, "Malformed JSON");
            return;
        }
    };

    if let Err(err) = dispatch(server, connection, value).await {
        report_error(connection, err);
    }
}

async fn dispatch(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    value: Value,
) -> Result<(), ApplicationError> {
    if !value.get("type").is_some_and(Value::is_string) {
        return Err(ApplicationError::fatal("Unknown packet type"));
    }

    match connection.protocol().await {
        ProtocolVersion::V0 => {
            let packet: V0Packet = decode(value)?;
            v0::handle(server, connection, packet).await
        }
        ProtocolVersion::V1 => {
            let packet: V1Packet = decode(value)?;
            v1::handle(server, connection, packet).await
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApplicationError> {
    serde_json::from_value(value)
        .map_err(|err| ApplicationError::rejected(format!("Malformed packet: {err}")))
}

/// 把处理错误写回客户端；致命错误随后关闭连接。
pub fn report_error(connection: &Connection, err: ApplicationError) {
    if err.is_internal() {
        error!(connection_id = %connection.id(), error = %err, "packet handler failed");
    } else {
        debug!(connection_id = %connection.id(), error = %err, "packet rejected");
    }

    let message = err.client_message();
    connection.send(&ServerPacket::error(message.clone()));
    if let Some(code) = err.close_code() {
        connection.close(code, message);
    }
}

/// 连接关闭。从未认证的连接静默结束。
pub async fn handle_close(server: &Arc<ChatServer>, connection: &Arc<Connection>) {
    let Some(connection) = server.sessions().remove(connection.id()).await else {
        return;
    };
    let state = connection.state().await;
    let Some(user_id) = state.user_id else {
        return;
    };
    info!(connection_id = %connection.id(), user_id = %user_id, "session closed");

    let payload = json!({
        "userid": user_id,
        "userName": state.user_name,
    });
    if let Some(room) = state.current_room {
        server.notify(
            EventChannel::UserLeaveRoom,
            Event::new(json!({"roomid": room, "userid": user_id})),
        );
    }
    server.notify(
        EventChannel::ConnectionClose,
        Event::new(payload.clone()).with_connection(connection.clone()),
    );
    server.notify(EventChannel::UserQuit, Event::new(payload));

    server
        .sessions()
        .send_to_all(&ServerPacket::Disconnect { userid: user_id }, None)
        .await;
    if let Err(err) = server.update_rooms().await {
        warn!(error = %err, "failed to broadcast rooms after disconnect");
    }
    if let Err(err) = server.update_users().await {
        warn!(error = %err, "failed to broadcast users after disconnect");
    }
}

#[cfg(test)]
pub(crate) mod tests;
