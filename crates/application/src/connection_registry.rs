//! 连接注册表
//!
//! 持有当前所有打开的连接及其绑定的用户身份。连接的传输层是一个有界出站队列，
//! 由每个连接自己的写任务消费并写入底层 socket。

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use domain::{ConnectionId, ServerEvent, UserId};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{info, warn};

use crate::error::RealtimeError;

/// 连接的出站传输
pub type Transport = mpsc::Sender<ServerEvent>;

/// 连接生命周期状态
///
/// 注册表只保存 `Active` 连接；`Closing` 是会话断开清理期间的状态，
/// 不在注册表中的连接一律视为 `Closed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

/// 被关闭（或回收）的连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// 连接未注册或已关闭，本次写入是空操作
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    /// 出站队列已被写任务丢弃
    #[error("transport of connection {0} is gone")]
    TransportClosed(ConnectionId),
    #[error("write to connection {0} timed out")]
    Timeout(ConnectionId),
}

impl SendFailure {
    /// 本次失败是否导致连接被回收
    pub fn reaped(&self) -> bool {
        !matches!(self, SendFailure::Closed(_))
    }

    pub fn connection_id(&self) -> ConnectionId {
        match self {
            SendFailure::Closed(id) | SendFailure::TransportClosed(id) | SendFailure::Timeout(id) => {
                *id
            }
        }
    }
}

struct ConnectionEntry {
    user_id: UserId,
    transport: Transport,
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
    /// 串行化注册：重复传输的检查与插入必须是一步
    opening: Mutex<()>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            opening: Mutex::new(()),
            send_timeout,
        }
    }

    /// 注册一个已认证的连接。同一用户可以有任意多个连接（多设备），
    /// 只有同一个传输被重复注册时才失败。
    ///
    /// 传输只能按通道身份比较，检查需要扫描全部连接。
    pub fn open(&self, transport: Transport, user_id: UserId) -> Result<ConnectionId, RealtimeError> {
        let _opening = self
            .opening
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = self
            .connections
            .iter()
            .find(|entry| entry.value().transport.same_channel(&transport))
        {
            return Err(RealtimeError::DuplicateConnection(*existing.key()));
        }

        let id = ConnectionId::generate();
        self.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                transport,
            },
        );
        self.by_user.entry(user_id).or_default().insert(id);

        info!(connection_id = %id, user_id = %user_id, "连接已注册");
        Ok(id)
    }

    /// 关闭连接。幂等：只有真正移除连接的那次调用会返回 `Some`。
    pub fn close(&self, id: ConnectionId) -> Option<ClosedConnection> {
        let (_, entry) = self.connections.remove(&id)?;

        if let Some(mut ids) = self.by_user.get_mut(&entry.user_id) {
            ids.remove(&id);
        }
        self.by_user
            .remove_if(&entry.user_id, |_, ids| ids.is_empty());

        info!(connection_id = %id, user_id = %entry.user_id, "连接已关闭");
        Some(ClosedConnection {
            id,
            user_id: entry.user_id,
        })
    }

    /// 写入一个事件。写入失败或超时意味着连接已失效，连接会被立即回收，不做重试。
    pub async fn send(&self, id: ConnectionId, event: ServerEvent) -> Result<(), SendFailure> {
        // 先克隆发送端，避免跨 await 持有分片锁
        let transport = match self.connections.get(&id) {
            Some(entry) => entry.transport.clone(),
            None => return Err(SendFailure::Closed(id)),
        };

        let failure = match transport.send_timeout(event, self.send_timeout).await {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Closed(_)) => SendFailure::TransportClosed(id),
            Err(SendTimeoutError::Timeout(_)) => SendFailure::Timeout(id),
        };

        warn!(connection_id = %id, error = %failure, "写入连接失败，回收连接");
        match self.close(id) {
            Some(_) => Err(failure),
            // 并发的关闭已经完成了回收
            None => Err(SendFailure::Closed(id)),
        }
    }

    pub fn list_connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).map(|entry| entry.user_id)
    }

    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if self.connections.contains_key(&id) {
            ConnectionState::Active
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.state(id) == ConnectionState::Active
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }
}
