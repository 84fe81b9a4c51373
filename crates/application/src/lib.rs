//! 应用层实现。
//!
//! 协议状态机、事件总线、会话注册表与服务器句柄都在这里；
//! 存储、密码哈希与上传写入通过 trait 抽象，由基础设施层提供实现。

pub mod error;
pub mod events;
pub mod password;
pub mod plugin;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ApplicationError, PROTOCOL_CLOSE_CODE};
pub use events::{Event, EventBus, EventChannel, EventError, EventListener, Priority};
pub use password::{generate_password, PasswordHasher, PasswordHasherError};
pub use plugin::Plugin;
pub use protocol::{ProtocolVersion, ServerPacket};
pub use server::{
    ChatServer, ChatServerDependencies, ContextMenu, ContextMenuEntry, ServerSettings,
};
pub use session::{Connection, ConnectionState, Outbound, RoomView, SessionRegistry, UserView};
pub use storage::{MemoryStorage, StatePersistence, Storage, StorageResult, StorageState};
pub use upload::{StoredUpload, UploadError, UploadPayload, UploadStore};
