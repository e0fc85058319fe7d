//! 核心依赖的外部协作者接口
//!
//! 用户认证与消息持久化都在核心之外实现，核心只通过这两个 trait 使用它们。

use async_trait::async_trait;
use domain::{Message, MessageBody, MessageId, RoomId, Timestamp, UserId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("credential expired")]
    Expired,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    #[error("message {0} not found")]
    NotFound(MessageId),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 用户目录：校验凭证并解析出用户身份
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn authenticate(&self, credential: String) -> Result<UserId, DirectoryError>;
}

/// 消息存储。追加顺序就是房间内消息的权威顺序。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    // 追加一条消息，返回持久化后的消息ID
    async fn append(&self, message: Message) -> Result<MessageId, StoreError>;

    // 按时间倒序分页，返回结果按时间正序排列。已删除的消息不占页内名额，但仍可作为游标。
    async fn history(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError>;

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    // 编辑和删除写入新的版本，返回更新后的消息
    async fn edit(
        &self,
        id: MessageId,
        body: MessageBody,
        at: Timestamp,
    ) -> Result<Message, StoreError>;

    async fn delete(&self, id: MessageId, at: Timestamp) -> Result<Message, StoreError>;
}
