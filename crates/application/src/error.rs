use domain::{ConnectionId, DomainError, MessageId, RoomId};
use thiserror::Error;

use crate::repository::{DirectoryError, StoreError};

/// 实时核心的错误类型
///
/// 除 `AuthenticationError` 外，所有错误都只以 `error` 事件的形式回报给发起请求的连接，
/// 连接保持打开。
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] DirectoryError),
    #[error("connection {0} is not authenticated")]
    NotAuthenticated(ConnectionId),
    #[error("transport is already registered as connection {0}")]
    DuplicateConnection(ConnectionId),
    #[error("not a member of room {0}")]
    NotAMember(RoomId),
    #[error("message body cannot be empty")]
    EmptyMessage,
    #[error("message body exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("message {0} was sent by another user")]
    NotMessageOwner(MessageId),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl RealtimeError {
    /// `error` 事件中的错误码
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Authentication(_) => "AuthenticationError",
            RealtimeError::NotAuthenticated(_) => "NotAuthenticated",
            RealtimeError::DuplicateConnection(_) => "DuplicateConnection",
            RealtimeError::NotAMember(_) => "NotAMember",
            RealtimeError::EmptyMessage => "EmptyMessage",
            RealtimeError::MessageTooLong { .. } => "MessageTooLong",
            RealtimeError::MessageNotFound(_) => "MessageNotFound",
            RealtimeError::NotMessageOwner(_) => "NotMessageOwner",
            RealtimeError::InvalidEvent(_) => "InvalidEvent",
            RealtimeError::Persistence(_) => "PersistenceError",
        }
    }
}

impl From<DomainError> for RealtimeError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::EmptyMessage => RealtimeError::EmptyMessage,
            DomainError::MessageTooLong { max } => RealtimeError::MessageTooLong { max },
        }
    }
}
