//! 协议帧定义
//!
//! 每个协议版本的入站包是一个封闭的 tagged enum，以 `type` 字段区分；
//! 未知的 `type` 落到 `Unknown`，由分发层统一按致命错误处理。

use domain::{Message, PermissionGroup, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    server::ContextMenuEntry,
    session::{RoomView, UserView},
    upload::UploadPayload,
};

/// 服务器发往客户端的帧。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerPacket {
    Error {
        message: String,
    },
    RefreshNow,
    #[serde(rename_all = "camelCase")]
    Login {
        success: bool,
        userid: UserId,
        user_name: String,
        context_menu: Vec<ContextMenuEntry>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateUsers {
        user_list: Vec<UserView>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateRooms {
        room_list: Vec<RoomView>,
    },
    UpdatePerms {
        perms: Vec<String>,
    },
    UpdateGroups {
        groups: Vec<PermissionGroup>,
    },
    SendMessage {
        roomid: RoomId,
        message: Message,
    },
    UpdateText {
        roomid: RoomId,
        segment: u64,
        messages: Vec<Message>,
    },
    JoinRoom {
        roomid: RoomId,
        userid: UserId,
    },
    LeaveRoom {
        roomid: RoomId,
        userid: UserId,
    },
    AdminMessage {
        message: String,
    },
    Invite {
        url: String,
    },
    Disconnect {
        userid: UserId,
    },
    Talking {
        userid: UserId,
        talking: bool,
    },
    #[serde(rename = "letmesee")]
    LetMeSee {
        userid: UserId,
    },
    /// 原样转发的 WebRTC 信令，`userid` 为发送者。
    #[serde(rename = "video")]
    Video {
        userid: UserId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    CustomWindow {
        window: Value,
    },
}

impl ServerPacket {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// 认证前可以发送的包。
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum V0Packet {
    Signup {
        email: Option<String>,
        password: Option<String>,
        #[serde(rename = "userName")]
        user_name: Option<String>,
        #[serde(rename = "signUp")]
        sign_up: Option<String>,
    },
    Login {
        email: Option<String>,
        password: Option<String>,
        protocol: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// 认证后的包。
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum V1Packet {
    Message {
        roomid: Option<RoomId>,
        text: Option<String>,
        #[serde(default)]
        tags: Vec<UserId>,
        upload: Option<UploadPayload>,
    },
    GetMessages {
        roomid: Option<RoomId>,
        segment: Option<u64>,
    },
    JoinRoom {
        roomid: Option<RoomId>,
    },
    LeaveRoom {},
    CreateRoom {
        #[serde(rename = "roomName")]
        room_name: Option<String>,
        #[serde(rename = "roomType")]
        room_type: Option<String>,
    },
    RemoveRoom {
        roomid: Option<RoomId>,
    },
    CreateUser {
        #[serde(rename = "userName")]
        user_name: Option<String>,
        email: Option<String>,
        group: Option<String>,
    },
    UpdateUser {
        userid: Option<UserId>,
        #[serde(rename = "userName")]
        user_name: Option<String>,
        hidden: Option<bool>,
    },
    RemoveUser {
        userid: Option<UserId>,
    },
    UpdateMessage {
        roomid: Option<RoomId>,
        idx: Option<u64>,
        text: Option<String>,
    },
    RemoveMessage {
        roomid: Option<RoomId>,
        idx: Option<u64>,
    },
    SetUserGroup {
        userid: Option<UserId>,
        #[serde(rename = "groupName")]
        group_name: Option<String>,
    },
    Invite {
        #[serde(rename = "groupName")]
        group_name: Option<String>,
    },
    GoLive {
        livestate: Option<bool>,
        livelabel: Option<String>,
    },
    LetMeSee {
        touserid: Option<UserId>,
    },
    Video {
        touserid: Option<UserId>,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    ServerMute {
        userid: Option<UserId>,
        suppress: Option<bool>,
    },
    Talking {
        talking: Option<bool>,
    },
    CreateGroup {
        #[serde(rename = "groupName")]
        group_name: Option<String>,
        #[serde(default)]
        perms: Vec<String>,
    },
    UpdateGroup {
        #[serde(rename = "groupName")]
        group_name: Option<String>,
        #[serde(rename = "addPerms", default)]
        add_perms: Vec<String>,
        #[serde(rename = "removePerms", default)]
        remove_perms: Vec<String>,
    },
    RemoveGroup {
        #[serde(rename = "groupName")]
        group_name: Option<String>,
    },
    ContextOption {
        option: Option<String>,
        userid: Option<UserId>,
    },
    #[serde(other)]
    Unknown,
}
