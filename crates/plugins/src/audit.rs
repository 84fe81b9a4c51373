//! 审计插件：在 MONITOR 优先级统计已发生的事件，
//! 计数持久化到插件数据，并通过 HTTP 暴露。

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use application::{ApplicationError, ChatServer, Event, EventChannel, EventListener, Plugin, Priority};
use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

pub const NAME: &str = "audit";
pub const STATS_PATH: &str = "/plugins/audit/stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    Messages,
    Connections,
    Joins,
    FailedLogins,
}

impl Counter {
    const ALL: [Counter; 4] = [
        Counter::Messages,
        Counter::Connections,
        Counter::Joins,
        Counter::FailedLogins,
    ];

    fn key(self) -> &'static str {
        match self {
            Counter::Messages => "messages",
            Counter::Connections => "connections",
            Counter::Joins => "joins",
            Counter::FailedLogins => "failedLogins",
        }
    }

    fn channel(self) -> EventChannel {
        match self {
            Counter::Messages => EventChannel::MessageSend,
            Counter::Connections => EventChannel::ConnectionNew,
            Counter::Joins => EventChannel::UserJoinRoom,
            Counter::FailedLogins => EventChannel::UserFailedAuth,
        }
    }
}

#[derive(Debug, Default)]
pub struct AuditCounters {
    messages: AtomicU64,
    connections: AtomicU64,
    joins: AtomicU64,
    failed_logins: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub messages: u64,
    pub connections: u64,
    pub joins: u64,
    pub failed_logins: u64,
}

impl AuditCounters {
    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Messages => &self.messages,
            Counter::Connections => &self.connections,
            Counter::Joins => &self.joins,
            Counter::FailedLogins => &self.failed_logins,
        }
    }

    fn increment(&self, counter: Counter) -> u64 {
        self.slot(counter).fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            messages: self.messages.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            failed_logins: self.failed_logins.load(Ordering::Relaxed),
        }
    }
}

pub struct AuditPlugin {
    counters: Arc<AuditCounters>,
}

impl Default for AuditPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditPlugin {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(AuditCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<AuditCounters> {
        self.counters.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(STATS_PATH, get(stats))
            .with_state(self.counters.clone())
    }
}

async fn stats(State(counters): State<Arc<AuditCounters>>) -> Json<AuditStats> {
    Json(counters.stats())
}

struct AuditListener {
    counter: Counter,
    counters: Arc<AuditCounters>,
    server: Weak<ChatServer>,
}

#[async_trait]
impl EventListener for AuditListener {
    async fn on_event(&self, _event: &mut Event) {
        let total = self.counters.increment(self.counter);
        let Some(server) = self.server.upgrade() else {
            return;
        };
        if let Err(err) = server
            .storage()
            .set_plugin_data(NAME, self.counter.key(), json!(total))
            .await
        {
            error!(counter = self.counter.key(), error = %err, "failed to persist audit counter");
        }
    }
}

#[async_trait]
impl Plugin for AuditPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, server: Arc<ChatServer>) -> Result<(), ApplicationError> {
        for counter in Counter::ALL {
            let stored = server
                .storage()
                .get_plugin_data(NAME, counter.key())
                .await?
                .and_then(|value| value.as_u64())
                .unwrap_or(0);
            self.counters.slot(counter).store(stored, Ordering::Relaxed);

            server
                .events()
                .listen(
                    counter.channel(),
                    Priority::Monitor,
                    Arc::new(AuditListener {
                        counter,
                        counters: self.counters.clone(),
                        server: Arc::downgrade(&server),
                    }),
                )
                .await?;
        }
        info!(stats = ?self.counters.stats(), "audit counters restored");
        Ok(())
    }
}
