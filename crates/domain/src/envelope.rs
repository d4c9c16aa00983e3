//! WebSocket 线上信封
//!
//! 每一帧（入站或出站）都是如下 JSON 对象：
//!
//! ```json
//! { "type": "message", "room_id": "R1", "user_id": "alice", "data": { ... } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;
use crate::value_objects::{ClientId, RoomId};

/// 事件类型。未知类型原样保留，便于扩展。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Message,
    Join,
    Leave,
    OnlineCount,
    System,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Message => "message",
            EventType::Join => "join",
            EventType::Leave => "leave",
            EventType::OnlineCount => "online_count",
            EventType::System => "system",
            EventType::Other(other) => other,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "message" => EventType::Message,
            "join" => EventType::Join,
            "leave" => EventType::Leave,
            "online_count" => EventType::OnlineCount,
            "system" => EventType::System,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 线上信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// 构造出站信封。`sender` 为 `None` 表示系统消息，`user_id` 为空串。
    pub fn new(
        event_type: EventType,
        room_id: &RoomId,
        sender: Option<&ClientId>,
        data: Value,
    ) -> Self {
        Self {
            event_type,
            room_id: room_id.to_string(),
            user_id: sender.map(ToString::to_string).unwrap_or_default(),
            data,
        }
    }

    /// 解码入站文本帧，超过 `max_bytes` 的帧直接拒绝。
    pub fn decode(frame: &str, max_bytes: usize) -> Result<Self, DomainError> {
        if frame.len() > max_bytes {
            return Err(DomainError::FrameTooLarge {
                size: frame.len(),
                limit: max_bytes,
            });
        }
        Ok(serde_json::from_str(frame)?)
    }

    pub fn encode(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 信封声明的房间，空串得到 `None`。
    pub fn room(&self) -> Option<RoomId> {
        RoomId::parse(self.room_id.clone())
    }
}
