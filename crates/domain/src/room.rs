use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{errors::DomainError, value_objects::RoomId};

/// 房间类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Text,
    Voice,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Text => "text",
            RoomType::Voice => "voice",
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(RoomType::Text),
            "voice" => Ok(RoomType::Voice),
            _ => Err(DomainError::invalid_argument(
                "roomType",
                "Room type must be \"text\" or \"voice\"",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomType,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>, kind: RoomType) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn is_voice(&self) -> bool {
        self.kind == RoomType::Voice
    }

    pub fn is_text(&self) -> bool {
        self.kind == RoomType::Text
    }
}
