//! 房间成员目录
//!
//! 维护 房间 → 成员连接 的内存索引，以及 连接 → 房间 的反向索引用于断开时的级联清理。
//! 同一房间的成员集合只在该房间的分片锁内修改，并发的加入/离开不会交错出不一致的集合。
//! 锁顺序固定为 先房间、后连接。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use domain::{ConnectionId, RoomId, UserId};
use tracing::{debug, info};

use crate::connection_registry::ConnectionRegistry;
use crate::error::RealtimeError;

/// 用户在房间内的在线状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// 该连接此前不在房间内
    pub newly_joined: bool,
    /// 该用户的第一个连接加入房间时产生
    pub presence: Option<PresenceChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_member: bool,
    /// 该用户在房间内的最后一个连接离开时产生
    pub presence: Option<PresenceChange>,
}

/// 单个房间的成员：用户 → 该用户在房间内的连接
#[derive(Debug, Default)]
struct RoomMembers {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RoomMembers {
    fn insert(&mut self, user_id: UserId, connection_id: ConnectionId) -> (bool, bool) {
        let connections = self.by_user.entry(user_id).or_default();
        let first_for_user = connections.is_empty();
        let inserted = connections.insert(connection_id);
        (inserted, first_for_user && inserted)
    }

    fn remove(&mut self, user_id: UserId, connection_id: ConnectionId) -> (bool, bool) {
        let Some(connections) = self.by_user.get_mut(&user_id) else {
            return (false, false);
        };
        let removed = connections.remove(&connection_id);
        let last_for_user = connections.is_empty();
        if last_for_user {
            self.by_user.remove(&user_id);
        }
        (removed, removed && last_for_user)
    }

    fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

/// 一个连接在某个房间内的成员记录
#[derive(Debug, Clone, Copy)]
struct Membership {
    room_id: RoomId,
    user_id: UserId,
}

pub struct RoomDirectory {
    registry: Arc<ConnectionRegistry>,
    rooms: DashMap<RoomId, RoomMembers>,
    by_connection: DashMap<ConnectionId, HashMap<RoomId, Membership>>,
}

impl RoomDirectory {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    /// 连接加入房间。幂等：重复加入不是错误，也不会重复产生在线事件。
    pub fn join(&self, room_id: RoomId, connection_id: ConnectionId) -> Result<JoinOutcome, RealtimeError> {
        let user_id = self
            .registry
            .user_of(connection_id)
            .ok_or(RealtimeError::NotAuthenticated(connection_id))?;

        // 成员集合与反向索引在房间锁内一起写入，存活检查也在锁内完成：
        // 并发的级联清理要么看不到这次加入，要么看到完整的加入
        let mut members = self.rooms.entry(room_id).or_default();
        let (newly_joined, first_for_user) = members.insert(user_id, connection_id);
        if newly_joined {
            self.by_connection
                .entry(connection_id)
                .or_default()
                .insert(room_id, Membership { room_id, user_id });

            if !self.registry.is_active(connection_id) {
                members.remove(user_id, connection_id);
                drop(members);
                self.remove_membership(room_id, user_id, connection_id);
                return Err(RealtimeError::NotAuthenticated(connection_id));
            }
        }
        drop(members);

        if newly_joined {
            info!(room_id = %room_id, connection_id = %connection_id, user_id = %user_id, "连接加入房间");
        }

        Ok(JoinOutcome {
            newly_joined,
            presence: first_for_user.then_some(PresenceChange {
                room_id,
                user_id,
                online: true,
            }),
        })
    }

    /// 连接离开房间
    pub fn leave(&self, room_id: RoomId, connection_id: ConnectionId) -> LeaveOutcome {
        let membership = self
            .by_connection
            .get_mut(&connection_id)
            .and_then(|mut rooms| rooms.remove(&room_id));
        self.by_connection
            .remove_if(&connection_id, |_, rooms| rooms.is_empty());

        let Some(membership) = membership else {
            return LeaveOutcome {
                was_member: false,
                presence: None,
            };
        };

        let last_for_user = self.remove_membership(room_id, membership.user_id, connection_id);
        info!(room_id = %room_id, connection_id = %connection_id, user_id = %membership.user_id, "连接离开房间");

        LeaveOutcome {
            was_member: true,
            presence: last_for_user.then_some(PresenceChange {
                room_id,
                user_id: membership.user_id,
                online: false,
            }),
        }
    }

    /// 从该连接加入过的每个房间中移除它（连接关闭时的级联清理）
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Vec<PresenceChange> {
        let Some((_, memberships)) = self.by_connection.remove(&connection_id) else {
            return Vec::new();
        };

        let changes: Vec<PresenceChange> = memberships
            .into_values()
            .filter_map(|membership| {
                let last_for_user =
                    self.remove_membership(membership.room_id, membership.user_id, connection_id);
                last_for_user.then_some(PresenceChange {
                    room_id: membership.room_id,
                    user_id: membership.user_id,
                    online: false,
                })
            })
            .collect();

        debug!(connection_id = %connection_id, offline = changes.len(), "已清理连接的房间成员关系");
        changes
    }

    /// 房间当前成员连接的快照。每次调用都重新读取，且排除已失效的连接。
    pub fn members_of(&self, room_id: RoomId) -> HashSet<ConnectionId> {
        let snapshot: Vec<ConnectionId> = match self.rooms.get(&room_id) {
            Some(members) => members.by_user.values().flatten().copied().collect(),
            None => return HashSet::new(),
        };

        snapshot
            .into_iter()
            .filter(|id| self.registry.is_active(*id))
            .collect()
    }

    pub fn is_member(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        self.by_connection
            .get(&connection_id)
            .is_some_and(|rooms| rooms.contains_key(&room_id))
            && self.registry.is_active(connection_id)
    }

    /// 房间内至少有一个存活连接的用户
    pub fn users_in(&self, room_id: RoomId) -> HashSet<UserId> {
        let snapshot: Vec<(UserId, Vec<ConnectionId>)> = match self.rooms.get(&room_id) {
            Some(members) => members
                .by_user
                .iter()
                .map(|(user_id, ids)| (*user_id, ids.iter().copied().collect()))
                .collect(),
            None => return HashSet::new(),
        };

        snapshot
            .into_iter()
            .filter(|(_, ids)| ids.iter().any(|id| self.registry.is_active(*id)))
            .map(|(user_id, _)| user_id)
            .collect()
    }

    pub fn contains_user(&self, room_id: RoomId, user_id: UserId) -> bool {
        let connections: Vec<ConnectionId> = match self.rooms.get(&room_id) {
            Some(members) => members
                .by_user
                .get(&user_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            None => return false,
        };

        connections.into_iter().any(|id| self.registry.is_active(id))
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        self.by_connection
            .get(&connection_id)
            .map(|rooms| rooms.keys().copied().collect())
            .unwrap_or_default()
    }

    /// 返回该用户是否已没有连接留在房间内
    fn remove_membership(&self, room_id: RoomId, user_id: UserId, connection_id: ConnectionId) -> bool {
        let last_for_user = match self.rooms.get_mut(&room_id) {
            Some(mut members) => members.remove(user_id, connection_id).1,
            None => false,
        };
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        if let Some(mut rooms) = self.by_connection.get_mut(&connection_id) {
            rooms.remove(&room_id);
        }
        self.by_connection
            .remove_if(&connection_id, |_, rooms| rooms.is_empty());
        last_for_user
    }
}
