//! 管理插件：在用户右键菜单中提供“踢出”。

use std::sync::{Arc, Weak};

use application::{
    ApplicationError, ChatServer, ContextMenuEntry, Event, EventChannel, EventListener, Plugin,
    Priority, PROTOCOL_CLOSE_CODE,
};
use async_trait::async_trait;
use domain::{permission::ADMIN_GROUP, UserId};
use tracing::{error, info, warn};

pub const NAME: &str = "moderation";
pub const KICK_OPTION: &str = "kick";
pub const KICK_USER: &str = "kickUser";

pub struct ModerationPlugin;

/// serverprep 时注册菜单项，并确保管理员组拥有踢人权限。
struct RegisterKick {
    server: Weak<ChatServer>,
}

#[async_trait]
impl EventListener for RegisterKick {
    async fn on_event(&self, _event: &mut Event) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        server
            .context_menu()
            .add(ContextMenuEntry::new("Kick", KICK_OPTION, Some(KICK_USER)))
            .await;
        if let Err(err) = server
            .storage()
            .add_group_permission(ADMIN_GROUP, KICK_USER)
            .await
        {
            error!(error = %err, "failed to grant kick permission to admins");
        }
    }
}

struct KickUser {
    server: Weak<ChatServer>,
}

#[async_trait]
impl EventListener for KickUser {
    async fn on_event(&self, event: &mut Event) {
        if event.get_str("option") != Some(KICK_OPTION) {
            return;
        }
        let Some(target) = event.get_str("targetid").and_then(|id| id.parse::<UserId>().ok())
        else {
            warn!("kick requested without a valid target");
            return;
        };
        let Some(server) = self.server.upgrade() else {
            return;
        };

        let sessions = server.sessions().connections_for_user(target).await;
        for connection in &sessions {
            connection.close(PROTOCOL_CLOSE_CODE, "Kicked");
        }
        info!(
            target_id = %target,
            by = event.get_str("userid").unwrap_or_default(),
            sessions = sessions.len(),
            "user kicked"
        );
    }
}

#[async_trait]
impl Plugin for ModerationPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, server: Arc<ChatServer>) -> Result<(), ApplicationError> {
        let events = server.events();
        events
            .listen(
                EventChannel::ServerPrep,
                Priority::Normal,
                Arc::new(RegisterKick {
                    server: Arc::downgrade(&server),
                }),
            )
            .await?;
        events
            .listen(
                EventChannel::UserContextMenuCallback,
                Priority::Normal,
                Arc::new(KickUser {
                    server: Arc::downgrade(&server),
                }),
            )
            .await?;
        Ok(())
    }
}
