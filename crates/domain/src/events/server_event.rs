use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 服务端推送给连接的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// 新消息
    NewMessage {
        id: MessageId,
        room_id: RoomId,
        sender_user_id: UserId,
        body: String,
        created_at: Timestamp,
        /// 房间内的持久化顺序号
        sequence: u64,
    },
    /// 消息已编辑
    MessageEdited {
        id: MessageId,
        room_id: RoomId,
        sender_user_id: UserId,
        body: String,
        edited_at: Timestamp,
        sequence: u64,
    },
    /// 消息已删除
    MessageDeleted {
        id: MessageId,
        room_id: RoomId,
        deleted_at: Timestamp,
        sequence: u64,
    },
    /// 用户在房间内上线/离线
    PresenceChanged {
        room_id: RoomId,
        user_id: UserId,
        online: bool,
    },
    /// 用户正在输入
    TypingChanged { room_id: RoomId, user_id: UserId },
    /// 已读标记
    MessageRead {
        room_id: RoomId,
        message_id: MessageId,
        user_id: UserId,
    },
    /// 加入房间成功（只发给加入者）
    RoomJoined { room_id: RoomId },
    /// 离开房间成功（只发给离开者）
    RoomLeft { room_id: RoomId },
    /// 历史消息（只发给请求者）
    History {
        room_id: RoomId,
        messages: Vec<HistoryEntry>,
    },
    /// 错误（只发给发起请求的连接）
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn new_message(message: &Message, sequence: u64) -> Self {
        ServerEvent::NewMessage {
            id: message.id,
            room_id: message.room_id,
            sender_user_id: message.sender_id,
            body: message.body.as_str().to_owned(),
            created_at: message.created_at,
            sequence,
        }
    }

    pub fn message_edited(message: &Message, edited_at: Timestamp, sequence: u64) -> Self {
        ServerEvent::MessageEdited {
            id: message.id,
            room_id: message.room_id,
            sender_user_id: message.sender_id,
            body: message.body.as_str().to_owned(),
            edited_at,
            sequence,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 历史消息条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: MessageId,
    pub sender_user_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_user_id: message.sender_id,
            body: message.body.as_str().to_owned(),
            created_at: message.created_at,
            edited_at: message.edited_at,
        }
    }
}
