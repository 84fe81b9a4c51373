//! 语音/文字群聊服务器核心领域模型
//!
//! 包含账户、房间、消息、权限组与注册邀请码，以及相关的校验规则。
//! 本 crate 不做任何 I/O。

pub mod account;
pub mod errors;
pub mod message;
pub mod permission;
pub mod room;
pub mod signup;
pub mod value_objects;

// 重新导出常用类型
pub use account::{Account, NewAccount, DEFAULT_AVATAR};
pub use errors::*;
pub use message::{Message, NewMessage, REMOVED_MESSAGE_TEXT, SEGMENT_SIZE};
pub use permission::PermissionGroup;
pub use room::{Room, RoomType};
pub use signup::SignupToken;
pub use value_objects::*;
