//! 文本房间消息与分段分页
//!
//! 每个文本房间拥有一条只追加的消息日志，`idx` 从 0 开始连续递增。
//! 分页以固定 5 条为一段：`segment = idx / 5`。删除消息只替换内容，
//! 不会改变任何其他消息的 `idx`。

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

/// 每个分页段包含的消息数量。
pub const SEGMENT_SIZE: u64 = 5;

/// 被删除消息的替换文本。
pub const REMOVED_MESSAGE_TEXT: &str = "*This message has been removed*";

/// `idx` 所在的分页段。
pub fn segment_of(idx: u64) -> u64 {
    idx / SEGMENT_SIZE
}

/// 房间共有 `count` 条消息时最新的分页段，空房间为 0。
pub fn newest_segment(count: u64) -> u64 {
    count.saturating_sub(1) / SEGMENT_SIZE
}

/// 分页段覆盖的 `idx` 区间 `[start, end)`。
pub fn segment_bounds(segment: u64) -> (u64, u64) {
    let start = segment * SEGMENT_SIZE;
    (start, start + SEGMENT_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub roomid: RoomId,
    pub idx: u64,
    pub userid: Option<UserId>,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// 合成消息的类型，例如 `webhook`。
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub time: Timestamp,
}

impl Message {
    pub fn segment(&self) -> u64 {
        segment_of(self.idx)
    }

    /// 原地删除：替换文本并清空作者与附件，保留 `idx`。
    pub fn redact(&mut self) {
        self.text = REMOVED_MESSAGE_TEXT.to_string();
        self.userid = None;
        self.tags.clear();
        self.url = None;
        self.img = None;
        self.width = None;
        self.height = None;
    }

    pub fn is_removed(&self) -> bool {
        self.userid.is_none() && self.kind.is_none() && self.text == REMOVED_MESSAGE_TEXT
    }
}

/// 追加消息时的输入，`idx` 由存储层分配。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    pub userid: Option<UserId>,
    pub username: String,
    pub text: String,
    pub tags: Vec<UserId>,
    pub url: Option<String>,
    pub img: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub kind: Option<String>,
}

impl NewMessage {
    pub fn into_message(self, roomid: RoomId, idx: u64, time: Timestamp) -> Message {
        Message {
            roomid,
            idx,
            userid: self.userid,
            username: self.username,
            text: self.text,
            tags: self.tags,
            url: self.url,
            img: self.img,
            width: self.width,
            height: self.height,
            kind: self.kind,
            time,
        }
    }
}
