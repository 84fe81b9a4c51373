//! 认证前协议：只接受 `signup` 与 `login`。

use std::sync::Arc;

use domain::{NewAccount, PlainPassword, StorageError, UserEmail, Username};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::ApplicationError,
    events::{Event, EventChannel, Priority},
    protocol::{packets::V0Packet, v1, ProtocolVersion, ServerPacket},
    server::ChatServer,
    session::Connection,
};

const INVALID_SIGNUP_CODE: &str = "Invalid or expired signup code";
const EMAIL_IN_USE: &str = "Email address already in use";
const PERMISSION_DENIED: &str = "Permission denied";

pub async fn handle(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    packet: V0Packet,
) -> Result<(), ApplicationError> {
    match packet {
        V0Packet::Signup {
            email,
            password,
            user_name,
            sign_up,
        } => {
            signup(
                server,
                connection,
                email.unwrap_or_default(),
                password.unwrap_or_default(),
                user_name.unwrap_or_default(),
                sign_up.unwrap_or_default(),
            )
            .await
        }
        V0Packet::Login {
            email,
            password,
            protocol,
        } => {
            login(
                server,
                connection,
                email.unwrap_or_default(),
                password.unwrap_or_default(),
                protocol,
            )
            .await
        }
        V0Packet::Unknown => Err(ApplicationError::fatal("Unknown packet type")),
    }
}

/// 注册码解析出的目标组。
enum SignupGrant {
    /// 配置中的无限次注册码，不消耗。
    Infinite(String),
    /// 存储中的一次性注册码。
    Token(String),
}

impl SignupGrant {
    fn group(&self) -> &str {
        match self {
            SignupGrant::Infinite(group) | SignupGrant::Token(group) => group,
        }
    }
}

async fn resolve_signup(server: &ChatServer, code: &str) -> Result<SignupGrant, ApplicationError> {
    let settings = server.settings();
    if !code.is_empty() && settings.infinite_signup_code.as_deref() == Some(code) {
        return Ok(SignupGrant::Infinite(settings.infinite_signup_group.clone()));
    }
    if code.is_empty() {
        return Err(ApplicationError::rejected(INVALID_SIGNUP_CODE));
    }
    server
        .storage()
        .check_sign_up(code)
        .await?
        .map(SignupGrant::Token)
        .ok_or_else(|| ApplicationError::rejected(INVALID_SIGNUP_CODE))
}

async fn signup(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    email: String,
    password: String,
    user_name: String,
    code: String,
) -> Result<(), ApplicationError> {
    // 先做本地校验，不碰存储
    let email = UserEmail::parse(email)?;
    let user_name = Username::parse(user_name)?;
    let password = PlainPassword::parse(password)?;

    let grant = resolve_signup(server, &code).await?;
    // 目标组可能在邀请码发出后被删除
    if server.storage().get_group(grant.group()).await?.is_none() {
        warn!(group = %grant.group(), "signup code points at a missing group");
        return Err(ApplicationError::rejected(INVALID_SIGNUP_CODE));
    }
    if server.storage().get_account_by_email(&email).await?.is_some() {
        return Err(ApplicationError::rejected(EMAIL_IN_USE));
    }

    // 凭据只对 EARLY..LATE 可见
    let mut event = Event::new(json!({
        "email": email.as_str(),
        "password": password.as_str(),
        "userName": user_name.as_str(),
        "group": grant.group(),
    }))
    .with_connection(connection.clone());
    let allowed = server
        .events()
        .trigger_through(EventChannel::UserCreate, &mut event, Priority::Late)
        .await?;
    if !allowed {
        let reason = event.reason().unwrap_or("Signup refused").to_string();
        return Err(ApplicationError::rejected(reason));
    }

    let hash = server.password_hasher().hash(password.as_str()).await?;

    let account = NewAccount {
        name: user_name,
        email,
        password: hash,
        group: grant.group().to_string(),
    };
    let created = match grant {
        SignupGrant::Infinite(_) => server.storage().create_account(account).await.map(Some),
        // 消耗邀请码与创建账户是同一个存储操作，冲突时邀请码保留
        SignupGrant::Token(_) => server.storage().redeem_sign_up(&code, account).await,
    };
    let account = created
        .map_err(|err| match err {
            StorageError::Conflict(_) => ApplicationError::rejected(EMAIL_IN_USE),
            other => other.into(),
        })?
        .ok_or_else(|| ApplicationError::rejected(INVALID_SIGNUP_CODE))?;

    info!(user_id = %account.id, group = %account.group, "account created via signup");
    connection.send(&ServerPacket::RefreshNow);
    Ok(())
}

async fn login(
    server: &Arc<ChatServer>,
    connection: &Arc<Connection>,
    email: String,
    password: String,
    protocol: Option<String>,
) -> Result<(), ApplicationError> {
    let version = protocol
        .as_deref()
        .and_then(ProtocolVersion::parse)
        .filter(ProtocolVersion::is_supported)
        .ok_or_else(|| ApplicationError::fatal("Unsupported protocol version"))?;

    // 邮箱格式错误与账户不存在一样处理，不泄露任何信息
    let account = match UserEmail::parse(email.clone()) {
        Ok(parsed) => server.storage().get_account_by_email(&parsed).await?,
        Err(_) => None,
    };
    let verified = match &account {
        Some(account) => {
            server
                .password_hasher()
                .verify(&password, &account.password)
                .await?
        }
        None => false,
    };
    let account = match account {
        Some(account) if verified => account,
        _ => {
            warn!(connection_id = %connection.id(), "failed login attempt");
            server.notify(
                EventChannel::UserFailedAuth,
                Event::new(json!({ "email": email })),
            );
            return Err(ApplicationError::fatal(PERMISSION_DENIED));
        }
    };

    let mut event = Event::new(json!({
        "userid": account.id,
        "userName": account.name,
        "email": account.email.as_str(),
    }))
    .with_connection(connection.clone());
    let allowed = server
        .events()
        .trigger_through(EventChannel::UserAuth, &mut event, Priority::Late)
        .await?;
    if !allowed {
        info!(user_id = %account.id, "login vetoed by listener");
        return Err(ApplicationError::fatal(PERMISSION_DENIED));
    }

    connection
        .update(|state| {
            state.user_id = Some(account.id);
            state.user_name = Some(account.name.clone());
            state.protocol = version;
        })
        .await;
    info!(connection_id = %connection.id(), user_id = %account.id, protocol = %version, "login succeeded");

    match version {
        ProtocolVersion::V1 => v1::switch_protocol(server, connection, &account).await,
        ProtocolVersion::V0 => Err(ApplicationError::fatal("Unsupported protocol version")),
    }
}
