//! 单元测试共用的夹具：内存存储、明文哈希器和可以读取出站帧的客户端。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Account, NewAccount, PasswordHash, UserEmail, Username};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::{
    password::{PasswordHasher, PasswordHasherError},
    protocol,
    server::{ChatServer, ChatServerDependencies, ServerSettings},
    session::{Connection, Outbound},
    storage::{MemoryStorage, Storage},
    upload::{UploadError, UploadStore},
};

pub const INFINITE_CODE: &str = "open-sesame";
pub const PASSWORD: &str = "longenough";

/// 不做真正哈希的密码器，测试里足够。
pub struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

pub struct PrefixUploads;

#[async_trait]
impl UploadStore for PrefixUploads {
    async fn store(&self, path: String, _bytes: Vec<u8>) -> Result<String, UploadError> {
        Ok(format!("/uploads/{path}"))
    }
}

pub struct Harness {
    pub server: Arc<ChatServer>,
    pub storage: Arc<MemoryStorage>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_uploads(Arc::new(PrefixUploads)).await
    }

    pub async fn with_uploads(uploads: Arc<dyn UploadStore>) -> Self {
        let harness = Self::unstarted(uploads);
        harness.server.start(&[]).await.unwrap();
        harness
    }

    /// 尚未调用 `start` 的服务器，用于在启动前注册监听器。
    pub fn unstarted(uploads: Arc<dyn UploadStore>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let server = ChatServer::new(ChatServerDependencies {
            storage: storage.clone(),
            uploads,
            password_hasher: Arc::new(PlainHasher),
            settings: ServerSettings {
                name: "Test Server".into(),
                description: "unit tests".into(),
                public_url: "https://chat.example.com/".into(),
                infinite_signup_code: Some(INFINITE_CODE.into()),
                max_upload_bytes: 1024,
                ..ServerSettings::default()
            },
        });
        Self { server, storage }
    }

    /// 打开一个连接并消费掉欢迎包。
    pub async fn connect(&self) -> Client {
        let mut client = self.connect_raw().await;
        client.drain();
        client
    }

    pub async fn connect_raw(&self) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(tx);
        protocol::handle_open(&self.server, &connection).await;
        Client {
            server: self.server.clone(),
            connection,
            rx,
        }
    }

    pub async fn account(&self, name: &str, group: &str) -> Account {
        self.storage
            .create_account(NewAccount {
                name: Username::parse(name).unwrap(),
                email: UserEmail::parse(format!("{}@example.com", name.to_lowercase())).unwrap(),
                password: PasswordHash::new(format!("plain:{PASSWORD}")).unwrap(),
                group: group.to_string(),
            })
            .await
            .unwrap()
    }

    /// 创建账户并登录，返回已经清空收件箱的客户端。
    pub async fn login(&self, name: &str, group: &str) -> (Client, Account) {
        let account = self.account(name, group).await;
        let mut client = self.connect().await;
        client
            .send(json!({
                "type": "login",
                "email": account.email.as_str(),
                "password": PASSWORD,
                "protocol": "v1",
            }))
            .await;
        let packets = client.packets();
        assert_eq!(packets[0]["type"], "login", "login failed: {packets:?}");
        (client, account)
    }
}

pub struct Client {
    server: Arc<ChatServer>,
    pub connection: Arc<Connection>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Client {
    pub async fn send(&mut self, packet: Value) {
        self.send_text(&packet.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        protocol::handle_frame(&self.server, &self.connection, text).await;
    }

    pub async fn close(&self) {
        protocol::handle_close(&self.server, &self.connection).await;
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(frame);
        }
        out
    }

    /// 已收到的文本帧，解析为 JSON。
    pub fn packets(&mut self) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Text(text) => serde_json::from_str(&text).ok(),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    pub fn types(&mut self) -> Vec<String> {
        types(&self.packets())
    }
}

pub fn types(packets: &[Value]) -> Vec<String> {
    packets
        .iter()
        .filter_map(|p| p["type"].as_str().map(str::to_string))
        .collect()
}

/// 从帧序列中取出关闭指令。
pub fn close_of(frames: &[Outbound]) -> Option<(u16, String)> {
    frames.iter().find_map(|frame| match frame {
        Outbound::Close { code, reason } => Some((*code, reason.clone())),
        Outbound::Text(_) => None,
    })
}

pub fn texts(frames: &[Outbound]) -> Vec<Value> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Outbound::Text(text) => serde_json::from_str(text).ok(),
            Outbound::Close { .. } => None,
        })
        .collect()
}
