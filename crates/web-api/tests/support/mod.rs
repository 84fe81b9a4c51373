#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ChatServer, ChatServerDependencies, MemoryStorage, ServerSettings, Storage};
use axum::Router;
use domain::{NewAccount, Room, RoomType, UserEmail, Username};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{BcryptPasswordHasher, LocalUploadStore};
use serde_json::Value;
use tempfile::TempDir;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, HttpSettings};

pub const PASSWORD: &str = "longenough";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestApp {
    pub addr: SocketAddr,
    pub server: Arc<ChatServer>,
    pub storage: Arc<MemoryStorage>,
    pub hasher: Arc<BcryptPasswordHasher>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 组装服务器与路由，但不监听端口。
pub async fn build_app(plugin_routes: Vec<Router>) -> (Router, Arc<ChatServer>, Arc<MemoryStorage>, Arc<BcryptPasswordHasher>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(MemoryStorage::new());
    let hasher = Arc::new(BcryptPasswordHasher::new(Some(4)));
    let uploads = Arc::new(LocalUploadStore::new(dir.path().join("uploads"), "/uploads"));

    let server = ChatServer::new(ChatServerDependencies {
        storage: storage.clone(),
        uploads,
        password_hasher: hasher.clone(),
        settings: ServerSettings {
            name: "Integration".into(),
            public_url: "http://chat.test".into(),
            infinite_signup_code: Some("open-door".into()),
            ..ServerSettings::default()
        },
    });
    server.start(&[]).await.expect("start chat server");

    std::fs::create_dir_all(dir.path().join("invite")).expect("invite dir");
    std::fs::write(
        dir.path().join("invite").join("index.html"),
        "<html><body>invite</body></html>",
    )
    .expect("invite page");

    let settings = HttpSettings {
        invite_dir: dir.path().join("invite"),
        upload_dir: dir.path().join("uploads"),
        upload_url_prefix: "/uploads".into(),
    };
    let app = router(AppState::new(server.clone()), &settings, plugin_routes);
    (app, server, storage, hasher, dir)
}

pub async fn spawn_app() -> TestApp {
    let (app, server, storage, hasher, dir) = build_app(Vec::new()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestApp {
        addr,
        server,
        storage,
        hasher,
        shutdown: Some(shutdown_tx),
        _dir: dir,
    }
}

impl TestApp {
    /// 打开连接并读掉欢迎包。
    pub async fn connect(&self) -> WsClient {
        let mut client = self.connect_raw().await;
        let welcome = client.recv().await;
        assert_eq!(welcome["type"], "connect", "unexpected welcome: {welcome}");
        client
    }

    pub async fn connect_raw(&self) -> WsClient {
        let (stream, _) = connect_async(format!("ws://{}/", self.addr))
            .await
            .expect("websocket connect");
        WsClient { stream }
    }

    pub async fn create_account(&self, name: &str, group: &str) -> domain::Account {
        use application::PasswordHasher;

        let password = self.hasher.hash(PASSWORD).await.expect("hash");
        self.storage
            .create_account(NewAccount {
                name: Username::parse(name).expect("username"),
                email: UserEmail::parse(format!("{}@example.com", name.to_lowercase()))
                    .expect("email"),
                password,
                group: group.to_string(),
            })
            .await
            .expect("create account")
    }

    pub async fn create_room(&self, name: &str, kind: RoomType) -> Room {
        let room = self
            .storage
            .create_room(name, kind)
            .await
            .expect("create room");
        self.server.update_rooms().await.expect("update rooms");
        room
    }

    /// 登录并消费完登录后的初始包。
    pub async fn login(&self, email: &str) -> WsClient {
        let mut client = self.connect().await;
        client
            .send(serde_json::json!({
                "type": "login",
                "email": email,
                "password": PASSWORD,
                "protocol": "v1",
            }))
            .await;
        let login = client.recv_type("login").await;
        assert_eq!(login["success"], true);
        client.recv_type("updateUsers").await;
        client
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, packet: Value) {
        self.stream
            .send(TungsteniteMessage::text(packet.to_string()))
            .await
            .expect("send frame");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(TungsteniteMessage::text(text.to_string()))
            .await
            .expect("send frame");
    }

    /// 下一个文本帧。
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            match message {
                TungsteniteMessage::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("json frame")
                }
                TungsteniteMessage::Close(frame) => panic!("connection closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// 跳过其它帧，直到收到指定类型。
    pub async fn recv_type(&mut self, packet_type: &str) -> Value {
        loop {
            let packet = self.recv().await;
            if packet["type"] == packet_type {
                return packet;
            }
        }
    }

    /// 等待关闭帧，返回关闭码和原因，期间收到的文本帧一并返回。
    pub async fn recv_close(&mut self) -> (u16, String, Vec<Value>) {
        let mut texts = Vec::new();
        loop {
            let message = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for close")
                .expect("stream ended")
                .expect("websocket error");
            match message {
                TungsteniteMessage::Text(text) => {
                    texts.push(serde_json::from_str(text.as_str()).expect("json frame"))
                }
                TungsteniteMessage::Close(Some(frame)) => {
                    return (u16::from(frame.code), frame.reason.to_string(), texts)
                }
                TungsteniteMessage::Close(None) => panic!("close without frame"),
                _ => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
