//! PostgreSQL 消息存储

use application::{MessageStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Message, MessageBody, MessageId, RoomId, Timestamp, UserId};
use sqlx::FromRow;
use tracing::error;
use uuid::Uuid;

use crate::db::DbPool;

const COLUMNS: &str = "id, room_id, sender_id, body, created_at, edited_at, deleted_at";

/// 数据库消息模型
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    body: String,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbMessage> for Message {
    type Error = StoreError;

    fn try_from(row: DbMessage) -> Result<Self, Self::Error> {
        // 入库前已校验过长度，这里只拒绝空正文
        let body = MessageBody::parse(row.body, usize::MAX).map_err(|err| {
            StoreError::unavailable(format!("corrupt message row {}: {err}", row.id))
        })?;

        let mut message = Message::new(
            MessageId::from(row.id),
            RoomId::from(row.room_id),
            UserId::from(row.sender_id),
            body,
            row.created_at,
        )
        .persisted(MessageId::from(row.id));
        message.edited_at = row.edited_at;
        message.is_deleted = row.deleted_at.is_some();
        Ok(message)
    }
}

fn database_error(err: sqlx::Error) -> StoreError {
    error!(error = %err, "消息存储数据库操作失败");
    StoreError::unavailable(err.to_string())
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: Message) -> Result<MessageId, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO messages (id, room_id, sender_id, body, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.body.as_str())
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(MessageId::from(id))
    }

    async fn history(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM messages
             WHERE room_id = $1
               AND deleted_at IS NULL
               AND ($2::uuid IS NULL OR seq < (SELECT seq FROM messages WHERE id = $2))
             ORDER BY seq DESC
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, DbMessage>(&sql)
            .bind(Uuid::from(room_id))
            .bind(before.map(Uuid::from))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        // 查询按倒序取最近的一页，返回时恢复为正序
        rows.into_iter()
            .rev()
            .map(Message::try_from)
            .collect()
    }

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE id = $1");
        sqlx::query_as::<_, DbMessage>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?
            .map(Message::try_from)
            .transpose()
    }

    async fn edit(
        &self,
        id: MessageId,
        body: MessageBody,
        at: Timestamp,
    ) -> Result<Message, StoreError> {
        let sql = format!(
            "UPDATE messages SET body = $2, edited_at = $3
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DbMessage>(&sql)
            .bind(Uuid::from(id))
            .bind(body.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?
            .ok_or(StoreError::NotFound(id))
            .and_then(Message::try_from)
    }

    async fn delete(&self, id: MessageId, at: Timestamp) -> Result<Message, StoreError> {
        let sql = format!(
            "UPDATE messages SET deleted_at = $2
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DbMessage>(&sql)
            .bind(Uuid::from(id))
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?
            .ok_or(StoreError::NotFound(id))
            .and_then(Message::try_from)
    }
}
