//! 内存消息存储
//!
//! 未配置数据库时使用；进程重启后消息丢失。

use application::{MessageStore, StoreError};
use async_trait::async_trait;
use domain::{Message, MessageBody, MessageId, RoomId, Timestamp};
use tokio::sync::RwLock;

/// 按追加顺序保存全部消息
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: Message) -> Result<MessageId, StoreError> {
        let id = message.id;
        self.messages.write().await.push(message.persisted(id));
        Ok(id)
    }

    async fn history(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let end = match before {
            Some(cursor) => match messages.iter().position(|m| m.id == cursor) {
                Some(index) => index,
                None => return Ok(Vec::new()),
            },
            None => messages.len(),
        };

        let mut page: Vec<Message> = messages[..end]
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id && !m.is_deleted)
            .take(limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn edit(
        &self,
        id: MessageId,
        body: MessageBody,
        at: Timestamp,
    ) -> Result<Message, StoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id && !m.is_deleted)
            .ok_or(StoreError::NotFound(id))?;

        *message = message.revised(body, at);
        Ok(message.clone())
    }

    async fn delete(&self, id: MessageId, _at: Timestamp) -> Result<Message, StoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id && !m.is_deleted)
            .ok_or(StoreError::NotFound(id))?;

        message.is_deleted = true;
        Ok(message.clone())
    }
}
