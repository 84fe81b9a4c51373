use std::path::PathBuf;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// 静态目录的挂载配置。
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub invite_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub upload_url_prefix: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            invite_dir: PathBuf::from("static/invite"),
            upload_dir: PathBuf::from("data/uploads"),
            upload_url_prefix: "/uploads".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InviteStatus {
    valid: bool,
    group: String,
    server_name: String,
}

/// 构建完整路由，插件贡献的路由直接合并进来。
pub fn router(state: AppState, settings: &HttpSettings, plugin_routes: Vec<Router>) -> Router {
    let upload_mount = format!("/{}", settings.upload_url_prefix.trim_matches('/'));

    let mut app = Router::new()
        .route("/", get(websocket_upgrade))
        .route("/health", get(health))
        .route("/api/invite/{code}", get(check_invite))
        .nest_service("/invite", ServeDir::new(&settings.invite_dir))
        .nest_service(&upload_mount, ServeDir::new(&settings.upload_dir))
        .with_state(state);

    for routes in plugin_routes {
        app = app.merge(routes);
    }

    app.layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state.server).run())
}

/// 邀请页用来确认注册码是否仍然有效，不会消耗注册码。
async fn check_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<InviteStatus>, ApiError> {
    let settings = state.server.settings();
    let group = if settings.infinite_signup_code.as_deref() == Some(code.as_str()) {
        Some(settings.infinite_signup_group.clone())
    } else {
        state.server.storage().check_sign_up(&code).await?
    };

    match group {
        Some(group) => Ok(Json(InviteStatus {
            valid: true,
            group,
            server_name: settings.name.clone(),
        })),
        None => Err(ApiError::not_found("Invalid or expired signup code")),
    }
}
