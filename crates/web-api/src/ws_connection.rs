use std::sync::Arc;

use application::{protocol, ChatServer, Connection, Outbound};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 单个 WebSocket 连接
///
/// 写入由独立的发送任务串行完成，协议层只向 mpsc 通道投递帧；
/// 读取循环逐帧等待处理结束后才读下一帧，同一连接的包按到达顺序处理。
pub struct WebSocketConnection {
    socket: WebSocket,
    server: Arc<ChatServer>,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, server: Arc<ChatServer>) -> Self {
        Self { socket, server }
    }

    pub async fn run(self) {
        let Self { socket, server } = self;
        let (mut sender, mut incoming) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let connection = Connection::new(tx);
        let connection_id = connection.id();
        info!(connection_id = %connection_id, "websocket connected");

        // 发送任务：收到关闭指令后发送关闭帧并结束
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if sender.send(WsMessage::Text(text.into())).await.is_err() {
                            warn!(connection_id = %connection_id, "failed to send text frame");
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        if sender.send(WsMessage::Close(Some(frame))).await.is_err() {
                            debug!(connection_id = %connection_id, "close frame not delivered");
                        }
                        break;
                    }
                }
            }
        });

        protocol::handle_open(&server, &connection).await;

        loop {
            tokio::select! {
                message = incoming.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        protocol::handle_frame(&server, &connection, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        debug!(connection_id = %connection_id, "ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(connection_id = %connection_id, error = %err, "websocket read failed");
                        break;
                    }
                },
                _ = &mut send_task => break,
            }
        }

        protocol::handle_close(&server, &connection).await;
        if !send_task.is_finished() {
            send_task.abort();
        }
        info!(connection_id = %connection_id, "websocket disconnected");
    }
}
