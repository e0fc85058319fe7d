use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 默认消息正文字符上限
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4000;

/// 经过校验的消息正文。
///
/// 长度按 Unicode 字符计数，而不是字节数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBody(String);

impl MessageBody {
    pub fn parse(value: impl Into<String>, max_chars: usize) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::EmptyMessage);
        }
        if value.chars().count() > max_chars {
            return Err(DomainError::MessageTooLong { max: max_chars });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 消息的投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    /// 已创建，尚未持久化
    Pending,
    /// 已写入 MessageStore
    Persisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: MessageBody,
    pub created_at: Timestamp,
    pub delivery_state: DeliveryState,
    pub edited_at: Option<Timestamp>,
    #[serde(skip_serializing)] // 删除标记不暴露给客户端
    pub is_deleted: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        body: MessageBody,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            body,
            created_at,
            delivery_state: DeliveryState::Pending,
            edited_at: None,
            is_deleted: false,
        }
    }

    /// 持久化成功后的副本
    pub fn persisted(mut self, id: MessageId) -> Self {
        self.id = id;
        self.delivery_state = DeliveryState::Persisted;
        self
    }

    /// 生成编辑后的新版本；已投递的旧副本不会被修改
    pub fn revised(&self, body: MessageBody, at: Timestamp) -> Self {
        Self {
            body,
            edited_at: Some(at),
            ..self.clone()
        }
    }

    pub fn is_sent_by(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }
}
