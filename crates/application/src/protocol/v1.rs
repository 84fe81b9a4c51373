//! 认证后的会话协议
//!
//! 变更类操作统一遵循：鉴权 → 校验 → 触发事件（可能被否决）→ 写存储 → 广播。
//! 鉴权失败回复 `Permission denied "<perm>"`，不产生任何副作用。

use std::sync::Arc;

use domain::{
    message::segment_of, permission, Account, DomainError, NewAccount, NewMessage,
    PermissionGroup, RoomId, RoomType, StorageError, UserEmail, UserId, Username,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::{
    error::{ApplicationError, PROTOCOL_CLOSE_CODE},
    events::{Event, EventChannel, Priority},
    password::generate_password,
    protocol::{packets::V1Packet, ServerPacket},
    server::ChatServer,
    session::Connection,
    upload::{store_upload, UploadPayload},
};

/// 管理员创建账户时生成的密码长度。
const GENERATED_PASSWORD_LEN: usize = 12;

/// 登录成功后的欢迎序列。
pub async fn switch_protocol(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    account: &Account,
) -> Result<(), ApplicationError> {
    server.sessions().add(connection.clone()).await;

    let perms = server.storage().get_account_permissions(account.id).await?;
    let groups = server.storage().get_groups().await?;
    connection.send(&ServerPacket::Login {
        success: true,
        userid: account.id,
        user_name: account.name.clone(),
        context_menu: server.context_menu().entries().await,
    });
    connection.send(&ServerPacket::UpdatePerms { perms });
    connection.send(&ServerPacket::UpdateGroups { groups });

    server.update_rooms().await?;
    server.update_users().await?;
    Ok(())
}

pub async fn handle(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    packet: V1Packet,
) -> Result<(), ApplicationError> {
    let caller = Caller::of(connection).await?;
    let ctx = Context {
        server,
        connection,
        caller,
    };

    match packet {
        V1Packet::Message {
            roomid,
            text,
            tags,
            upload,
        } => ctx.message(roomid, text, tags, upload).await,
        V1Packet::GetMessages { roomid, segment } => ctx.get_messages(roomid, segment).await,
        V1Packet::JoinRoom { roomid } => ctx.join_room(roomid).await,
        V1Packet::LeaveRoom {} => ctx.leave_room().await,
        V1Packet::CreateRoom {
            room_name,
            room_type,
        } => ctx.create_room(room_name, room_type).await,
        V1Packet::RemoveRoom { roomid } => ctx.remove_room(roomid).await,
        V1Packet::CreateUser {
            user_name,
            email,
            group,
        } => ctx.create_user(user_name, email, group).await,
        V1Packet::UpdateUser {
            userid,
            user_name,
            hidden,
        } => ctx.update_user(userid, user_name, hidden).await,
        V1Packet::RemoveUser { userid } => ctx.remove_user(userid).await,
        V1Packet::UpdateMessage { roomid, idx, text } => {
            let text = required(text, "text")?;
            ctx.change_message(roomid, idx, Some(text)).await
        }
        V1Packet::RemoveMessage { roomid, idx } => ctx.change_message(roomid, idx, None).await,
        V1Packet::SetUserGroup { userid, group_name } => {
            ctx.set_user_group(userid, group_name).await
        }
        V1Packet::Invite { group_name } => ctx.invite(group_name).await,
        V1Packet::GoLive {
            livestate,
            livelabel,
        } => ctx.go_live(livestate, livelabel).await,
        V1Packet::LetMeSee { touserid } => ctx.let_me_see(touserid).await,
        V1Packet::Video { touserid, payload } => ctx.video(touserid, payload).await,
        V1Packet::ServerMute { userid, suppress } => ctx.server_mute(userid, suppress).await,
        V1Packet::Talking { talking } => ctx.talking(talking).await,
        V1Packet::CreateGroup { group_name, perms } => ctx.create_group(group_name, perms).await,
        V1Packet::UpdateGroup {
            group_name,
            add_perms,
            remove_perms,
        } => ctx.update_group(group_name, add_perms, remove_perms).await,
        V1Packet::RemoveGroup { group_name } => ctx.remove_group(group_name).await,
        V1Packet::ContextOption { option, userid } => ctx.context_option(option, userid).await,
        V1Packet::Unknown => Err(ApplicationError::fatal("Unknown packet type")),
    }
}

/// 当前连接的认证身份。
struct Caller {
    id: UserId,
    name: String,
}

impl Caller {
    async fn of(connection: &Connection) -> Result<Self, ApplicationError> {
        let state = connection.state().await;
        match state.user_id {
            Some(id) => Ok(Self {
                id,
                name: state.user_name.unwrap_or_default(),
            }),
            None => Err(ApplicationError::fatal("Not authenticated")),
        }
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ApplicationError> {
    value.ok_or_else(|| DomainError::invalid_argument(field, format!("Missing \"{field}\"")).into())
}

fn vetoed(event: &Event, fallback: &str) -> ApplicationError {
    ApplicationError::rejected(event.reason().unwrap_or(fallback).to_string())
}

struct Context<'a> {
    server: &'a Arc<ChatServer>,
    connection: &'a Arc<Connection>,
    caller: Caller,
}

impl Context<'_> {
    async fn require(&self, perm: &str) -> Result<(), ApplicationError> {
        if self
            .server
            .storage()
            .get_account_permission(self.caller.id, perm)
            .await?
        {
            Ok(())
        } else {
            debug!(user_id = %self.caller.id, permission = perm, "permission denied");
            Err(ApplicationError::permission_denied(perm))
        }
    }

    fn event(&self, data: Value) -> Event {
        Event::new(data).with_connection(self.connection.clone())
    }

    async fn trigger(&self, channel: EventChannel, event: &mut Event) -> Result<bool, ApplicationError> {
        Ok(self.server.events().trigger(channel, event).await?)
    }

    async fn text_room(&self, roomid: Option<RoomId>) -> Result<RoomId, ApplicationError> {
        let roomid = required(roomid, "roomid")?;
        match self.server.storage().get_room(roomid).await? {
            Some(room) if room.is_text() => Ok(roomid),
            _ => Err(ApplicationError::rejected("Unknown text room")),
        }
    }

    // ----- 消息 -----

    async fn message(
        &self,
        roomid: Option<RoomId>,
        text: Option<String>,
        tags: Vec<UserId>,
        upload: Option<UploadPayload>,
    ) -> Result<(), ApplicationError> {
        let roomid = self.text_room(roomid).await?;
        let text = text.unwrap_or_default();
        if text.trim().is_empty() && upload.is_none() {
            return Err(DomainError::invalid_argument("text", "Message cannot be empty").into());
        }

        let mut event = self.event(json!({
            "roomid": roomid,
            "userid": self.caller.id,
            "userName": self.caller.name,
            "text": text,
            "tags": tags,
        }));
        if !self.trigger(EventChannel::MessageCreate, &mut event).await? {
            return Err(vetoed(&event, "Message refused"));
        }
        if !self.trigger(EventChannel::MessageSend, &mut event).await? {
            return Err(vetoed(&event, "Message refused"));
        }
        // 监听器可以改写文本
        let text = event.get_str("text").unwrap_or_default().to_string();

        let mut message = NewMessage {
            userid: Some(self.caller.id),
            username: self.caller.name.clone(),
            text,
            tags,
            ..NewMessage::default()
        };
        if let Some(upload) = upload {
            let stored = store_upload(
                self.server.uploads(),
                self.caller.id,
                &upload,
                self.server.settings().max_upload_bytes,
            )
            .await?;
            message.url = Some(stored.url);
            message.img = stored.img;
            message.width = stored.width;
            message.height = stored.height;
        }

        let message = self.server.storage().add_message(roomid, message).await?;
        debug!(room_id = %roomid, idx = message.idx, user_id = %self.caller.id, "message stored");
        self.server
            .sessions()
            .send_to_all(&ServerPacket::SendMessage { roomid, message }, None)
            .await;
        Ok(())
    }

    async fn get_messages(
        &self,
        roomid: Option<RoomId>,
        segment: Option<u64>,
    ) -> Result<(), ApplicationError> {
        let roomid = self.text_room(roomid).await?;
        let storage = self.server.storage();
        let segment = match segment {
            Some(segment) => segment,
            None => storage.get_text_room_newest_segment(roomid).await?,
        };
        let messages = storage.get_text_for_room(roomid, segment).await?;
        self.connection.send(&ServerPacket::UpdateText {
            roomid,
            segment,
            messages,
        });
        Ok(())
    }

    async fn change_message(
        &self,
        roomid: Option<RoomId>,
        idx: Option<u64>,
        text: Option<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::CHANGE_MESSAGE).await?;
        let roomid = self.text_room(roomid).await?;
        let idx = required(idx, "idx")?;
        let storage = self.server.storage();
        let old = storage
            .get_message(roomid, idx)
            .await?
            .ok_or_else(|| ApplicationError::rejected("Unknown message"))?;

        let mut event = self.event(json!({
            "roomid": roomid,
            "idx": idx,
            "userid": self.caller.id,
            "oldMessage": old,
            "newText": text,
            "removed": text.is_none(),
        }));
        if !self.trigger(EventChannel::MessageChange, &mut event).await? {
            return Err(vetoed(&event, "Message change refused"));
        }

        let changed = match text {
            Some(_) => {
                let text = event.get_str("newText").unwrap_or_default().to_string();
                storage.update_message(roomid, idx, &text).await?
            }
            None => storage.remove_message(roomid, idx).await?,
        };
        if changed.is_none() {
            return Err(ApplicationError::rejected("Unknown message"));
        }

        let segment = segment_of(idx);
        let messages = storage.get_text_for_room(roomid, segment).await?;
        self.server
            .sessions()
            .send_to_all(
                &ServerPacket::UpdateText {
                    roomid,
                    segment,
                    messages,
                },
                None,
            )
            .await;
        Ok(())
    }

    // ----- 语音房间与在线状态 -----

    async fn join_room(&self, roomid: Option<RoomId>) -> Result<(), ApplicationError> {
        let roomid = required(roomid, "roomid")?;
        let room = self
            .server
            .storage()
            .get_room(roomid)
            .await?
            .ok_or_else(|| ApplicationError::rejected("Unknown room"))?;
        if !room.is_voice() {
            return Err(ApplicationError::rejected("Only voice rooms can be joined"));
        }

        // 重复加入同一个房间不做任何事
        let switched = self
            .connection
            .update(|state| {
                if state.current_room == Some(roomid) {
                    return None;
                }
                let previous = state.current_room;
                state.leave_room();
                state.current_room = Some(roomid);
                Some(previous)
            })
            .await;
        let Some(previous) = switched else {
            return Ok(());
        };

        let sessions = self.server.sessions();
        let userid = self.caller.id;
        if let Some(old) = previous {
            self.server.notify(
                EventChannel::UserLeaveRoom,
                self.event(json!({"roomid": old, "userid": userid})),
            );
            sessions
                .send_to_all(&ServerPacket::LeaveRoom { roomid: old, userid }, None)
                .await;
        }
        self.server.notify(
            EventChannel::UserJoinRoom,
            self.event(json!({"roomid": roomid, "userid": userid})),
        );
        sessions
            .send_to_all(&ServerPacket::JoinRoom { roomid, userid }, None)
            .await;
        self.server.update_rooms().await?;
        Ok(())
    }

    async fn leave_room(&self) -> Result<(), ApplicationError> {
        let left = self
            .connection
            .update(|state| {
                let room = state.current_room;
                state.leave_room();
                room
            })
            .await;
        let Some(roomid) = left else {
            return Ok(());
        };

        let userid = self.caller.id;
        self.server.notify(
            EventChannel::UserLeaveRoom,
            self.event(json!({"roomid": roomid, "userid": userid})),
        );
        self.server
            .sessions()
            .send_to_all(&ServerPacket::LeaveRoom { roomid, userid }, None)
            .await;
        self.server.update_rooms().await?;
        self.server.update_users().await?;
        Ok(())
    }

    async fn go_live(
        &self,
        livestate: Option<bool>,
        livelabel: Option<String>,
    ) -> Result<(), ApplicationError> {
        let live = required(livestate, "livestate")?;
        self.connection
            .update(|state| {
                state.live_state = live;
                state.live_label = if live { livelabel } else { None };
            })
            .await;
        self.server.update_rooms().await?;
        self.server.update_users().await?;
        Ok(())
    }

    async fn let_me_see(&self, touserid: Option<UserId>) -> Result<(), ApplicationError> {
        let target = required(touserid, "touserid")?;
        self.server
            .sessions()
            .send_to_id(target, &ServerPacket::LetMeSee { userid: self.caller.id })
            .await;
        Ok(())
    }

    /// WebRTC 信令只转发给目标用户，从不广播。
    async fn video(
        &self,
        touserid: Option<UserId>,
        mut payload: Map<String, Value>,
    ) -> Result<(), ApplicationError> {
        let target = required(touserid, "touserid")?;
        payload.remove("userid");
        payload.remove("type");
        self.server
            .sessions()
            .send_to_id(
                target,
                &ServerPacket::Video {
                    userid: self.caller.id,
                    payload,
                },
            )
            .await;
        Ok(())
    }

    async fn server_mute(
        &self,
        userid: Option<UserId>,
        suppress: Option<bool>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::SUPPRESS_USER).await?;
        let target = required(userid, "userid")?;
        let suppress = suppress.unwrap_or(true);

        for connection in self.server.sessions().connections_for_user(target).await {
            connection
                .update(|state| {
                    state.suppressed = suppress;
                    if suppress {
                        state.talking = false;
                    }
                })
                .await;
        }
        info!(user_id = %target, by = %self.caller.id, suppress, "server mute changed");
        self.server.update_rooms().await?;
        self.server.update_users().await?;
        Ok(())
    }

    async fn talking(&self, talking: Option<bool>) -> Result<(), ApplicationError> {
        let talking = required(talking, "talking")?;
        let talking = self
            .connection
            .update(|state| {
                state.talking = talking && !state.suppressed;
                state.talking
            })
            .await;
        self.server
            .sessions()
            .send_to_all(
                &ServerPacket::Talking {
                    userid: self.caller.id,
                    talking,
                },
                None,
            )
            .await;
        Ok(())
    }

    // ----- 房间管理 -----

    async fn create_room(
        &self,
        room_name: Option<String>,
        room_type: Option<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::CREATE_ROOM).await?;
        let name = required(room_name, "roomName")?.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("roomName", "Room name cannot be empty").into());
        }
        let kind: RoomType = required(room_type, "roomType")?.parse()?;

        let mut event = self.event(json!({
            "roomName": name,
            "roomType": kind,
            "userid": self.caller.id,
        }));
        if !self.trigger(EventChannel::RoomCreate, &mut event).await? {
            return Err(vetoed(&event, "Room creation refused"));
        }

        let room = self.server.storage().create_room(&name, kind).await?;
        info!(room_id = %room.id, kind = %room.kind, by = %self.caller.id, "room created");
        self.server.update_rooms().await?;
        Ok(())
    }

    async fn remove_room(&self, roomid: Option<RoomId>) -> Result<(), ApplicationError> {
        self.require(permission::REMOVE_ROOM).await?;
        let roomid = required(roomid, "roomid")?;
        let room = self
            .server
            .storage()
            .get_room(roomid)
            .await?
            .ok_or_else(|| ApplicationError::rejected("Unknown room"))?;

        let mut event = self.event(json!({
            "roomid": room.id,
            "roomName": room.name,
            "userid": self.caller.id,
        }));
        if !self.trigger(EventChannel::RoomDelete, &mut event).await? {
            return Err(vetoed(&event, "Room removal refused"));
        }

        self.server.storage().remove_room(roomid).await?;
        for connection in self.server.sessions().snapshot().await {
            connection
                .update(|state| {
                    if state.current_room == Some(roomid) {
                        state.leave_room();
                    }
                })
                .await;
        }
        info!(room_id = %roomid, by = %self.caller.id, "room removed");
        self.server.update_rooms().await?;
        self.server.update_users().await?;
        Ok(())
    }

    // ----- 用户管理 -----

    async fn create_user(
        &self,
        user_name: Option<String>,
        email: Option<String>,
        group: Option<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::CREATE_USER).await?;
        let name = Username::parse(required(user_name, "userName")?)?;
        let email = UserEmail::parse(required(email, "email")?)?;
        let group = group.unwrap_or_else(|| permission::USER_GROUP.to_string());

        let storage = self.server.storage();
        if storage.get_group(&group).await?.is_none() {
            return Err(ApplicationError::rejected("Unknown group"));
        }
        if storage.get_account_by_email(&email).await?.is_some() {
            return Err(ApplicationError::rejected("Email address already in use"));
        }

        let password = generate_password(GENERATED_PASSWORD_LEN);
        let mut event = self.event(json!({
            "email": email.as_str(),
            "password": password,
            "userName": name.as_str(),
            "group": group,
        }));
        let allowed = self
            .server
            .events()
            .trigger_through(EventChannel::UserCreate, &mut event, Priority::Late)
            .await?;
        if !allowed {
            return Err(vetoed(&event, "User creation refused"));
        }

        let hash = self.server.password_hasher().hash(&password).await?;
        let account = storage
            .create_account(NewAccount {
                name,
                email,
                password: hash,
                group,
            })
            .await
            .map_err(|err| match err {
                StorageError::Conflict(_) => {
                    ApplicationError::rejected("Email address already in use")
                }
                other => other.into(),
            })?;

        info!(user_id = %account.id, by = %self.caller.id, "account created by admin");
        self.connection.send(&ServerPacket::AdminMessage {
            message: format!(
                "Created user \"{}\" ({}) with password: {}",
                account.name, account.email, password
            ),
        });
        self.server.update_users().await?;
        Ok(())
    }

    async fn update_user(
        &self,
        userid: Option<UserId>,
        user_name: Option<String>,
        hidden: Option<bool>,
    ) -> Result<(), ApplicationError> {
        let target = userid.unwrap_or(self.caller.id);
        if target != self.caller.id {
            self.require(permission::RENAME_USER).await?;
        }
        let new_name = user_name.map(Username::parse).transpose()?;

        let storage = self.server.storage();
        let mut account = storage
            .get_account(target)
            .await?
            .ok_or_else(|| ApplicationError::rejected("Unknown user"))?;
        let old_name = account.name.clone();
        if let Some(name) = new_name {
            account.rename(name);
        }
        if let Some(hidden) = hidden {
            account.hidden = hidden;
        }
        let renamed = account.name != old_name;
        let new_name = account.name.clone();
        storage.update_account(account).await?;

        if renamed {
            for connection in self.server.sessions().connections_for_user(target).await {
                let name = new_name.clone();
                connection.update(|state| state.user_name = Some(name)).await;
            }
            self.server.notify(
                EventChannel::UserChangeName,
                self.event(json!({
                    "userid": target,
                    "oldName": old_name,
                    "newName": new_name,
                })),
            );
            self.server.update_rooms().await?;
        }
        self.server.update_users().await?;
        Ok(())
    }

    async fn remove_user(&self, userid: Option<UserId>) -> Result<(), ApplicationError> {
        self.require(permission::REMOVE_USER).await?;
        let target = userid.unwrap_or(self.caller.id);
        let storage = self.server.storage();
        let account = storage
            .get_account(target)
            .await?
            .ok_or_else(|| ApplicationError::rejected("Unknown user"))?;

        let mut event = self.event(json!({
            "userid": account.id,
            "userName": account.name,
            "by": self.caller.id,
        }));
        if !self.trigger(EventChannel::UserDelete, &mut event).await? {
            return Err(vetoed(&event, "User removal refused"));
        }

        storage.delete_account(target).await?;
        info!(user_id = %target, by = %self.caller.id, "account removed");

        let sessions = self.server.sessions();
        for connection in sessions.connections_for_user(target).await {
            if sessions.remove(connection.id()).await.is_some() {
                self.server.notify(
                    EventChannel::UserQuit,
                    Event::new(json!({"userid": target, "userName": account.name})),
                );
            }
            connection.close(PROTOCOL_CLOSE_CODE, "Account removed");
        }
        sessions
            .send_to_all(&ServerPacket::Disconnect { userid: target }, None)
            .await;
        self.server.update_users().await?;
        self.server.update_rooms().await?;
        Ok(())
    }

    async fn set_user_group(
        &self,
        userid: Option<UserId>,
        group_name: Option<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::SET_USER_GROUP).await?;
        let target = required(userid, "userid")?;
        let group = required(group_name, "groupName")?;

        let storage = self.server.storage();
        if storage.get_group(&group).await?.is_none() {
            return Err(ApplicationError::rejected("Unknown group"));
        }
        if !storage.set_account_group(target, &group).await? {
            return Err(ApplicationError::rejected("Unknown user"));
        }
        info!(user_id = %target, group = %group, by = %self.caller.id, "account group changed");

        let perms = storage.get_account_permissions(target).await?;
        self.server
            .sessions()
            .send_to_id(target, &ServerPacket::UpdatePerms { perms })
            .await;
        self.server.update_users().await?;
        Ok(())
    }

    async fn invite(&self, group_name: Option<String>) -> Result<(), ApplicationError> {
        self.require(permission::INVITE_USER_ANY).await?;
        let group = group_name.unwrap_or_else(|| permission::USER_GROUP.to_string());
        let storage = self.server.storage();
        if storage.get_group(&group).await?.is_none() {
            return Err(ApplicationError::rejected("Unknown group"));
        }
        let token = storage.generate_sign_up(&group).await?;
        debug!(group = %group, by = %self.caller.id, "invite generated");
        self.connection.send(&ServerPacket::Invite {
            url: self.server.invite_url(&token.token),
        });
        Ok(())
    }

    // ----- 权限组 -----

    async fn create_group(
        &self,
        group_name: Option<String>,
        perms: Vec<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::SET_GROUP_PERM).await?;
        let name = required(group_name, "groupName")?.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("groupName", "Group name cannot be empty").into());
        }

        let storage = self.server.storage();
        storage
            .create_group(PermissionGroup::with_permissions(name.clone(), perms))
            .await
            .map_err(|err| match err {
                StorageError::Conflict(_) => ApplicationError::rejected("Group already exists"),
                other => other.into(),
            })?;
        info!(group = %name, by = %self.caller.id, "permission group created");

        let groups = storage.get_groups().await?;
        self.connection.send(&ServerPacket::UpdateGroups { groups });
        Ok(())
    }

    async fn update_group(
        &self,
        group_name: Option<String>,
        add_perms: Vec<String>,
        remove_perms: Vec<String>,
    ) -> Result<(), ApplicationError> {
        self.require(permission::SET_GROUP_PERM).await?;
        let name = required(group_name, "groupName")?;
        let storage = self.server.storage();
        if storage.get_group(&name).await?.is_none() {
            return Err(ApplicationError::rejected("Unknown group"));
        }

        for perm in &add_perms {
            storage.add_group_permission(&name, perm).await?;
        }
        for perm in &remove_perms {
            storage.remove_group_permission(&name, perm).await?;
        }
        info!(group = %name, added = add_perms.len(), removed = remove_perms.len(), "permission group updated");

        let groups = storage.get_groups().await?;
        self.connection.send(&ServerPacket::UpdateGroups { groups });

        // 在线的组成员立即拿到新的权限集合
        for connection in self.server.sessions().snapshot().await {
            let Some(user_id) = connection.user_id().await else {
                continue;
            };
            let in_group = storage
                .get_account(user_id)
                .await?
                .is_some_and(|account| account.group == name);
            if in_group {
                let perms = storage.get_account_permissions(user_id).await?;
                connection.send(&ServerPacket::UpdatePerms { perms });
            }
        }
        Ok(())
    }

    async fn remove_group(&self, group_name: Option<String>) -> Result<(), ApplicationError> {
        self.require(permission::SET_GROUP_PERM).await?;
        let name = required(group_name, "groupName")?;
        let storage = self.server.storage();
        if storage.get_group(&name).await?.is_none() {
            return Err(ApplicationError::rejected("Unknown group"));
        }
        let assigned = storage
            .get_all_accounts()
            .await?
            .iter()
            .any(|account| account.group == name);
        if assigned {
            return Err(ApplicationError::rejected("Group is still assigned to users"));
        }
        let settings = self.server.settings();
        if settings.infinite_signup_code.is_some() && settings.infinite_signup_group == name {
            return Err(ApplicationError::rejected(
                "Group is the target of the infinite signup code",
            ));
        }

        storage.remove_group(&name).await?;
        info!(group = %name, by = %self.caller.id, "permission group removed");
        let groups = storage.get_groups().await?;
        self.server
            .sessions()
            .send_to_all(&ServerPacket::UpdateGroups { groups }, None)
            .await;
        Ok(())
    }

    // ----- 插件上下文菜单 -----

    async fn context_option(
        &self,
        option: Option<String>,
        userid: Option<UserId>,
    ) -> Result<(), ApplicationError> {
        let option = required(option, "option")?;
        let target = required(userid, "userid")?;
        let entry = self
            .server
            .context_menu()
            .find(&option)
            .await
            .ok_or_else(|| ApplicationError::rejected("Unknown context option"))?;
        if let Some(perm) = &entry.permission_required {
            self.require(perm).await?;
        }

        self.server.notify(
            EventChannel::UserContextMenuCallback,
            self.event(json!({
                "option": option,
                "userid": self.caller.id,
                "targetid": target,
            })),
        );
        Ok(())
    }
}
