//! 在线与输入状态
//!
//! 在线状态不单独存储，直接由房间成员目录推导：用户在房间内有至少一个连接即为在线。
//! 输入状态按 (房间, 用户) 记录最近一次输入时间，超过窗口后在读取时惰性过期。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{RoomId, Timestamp, UserId};
use tracing::debug;

use crate::clock::Clock;
use crate::room_directory::RoomDirectory;

pub struct PresenceTracker {
    rooms: Arc<RoomDirectory>,
    typing: DashMap<RoomId, HashMap<UserId, Timestamp>>,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl PresenceTracker {
    pub fn new(rooms: Arc<RoomDirectory>, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms,
            typing: DashMap::new(),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    pub fn is_online(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.rooms.contains_user(room_id, user_id)
    }

    pub fn online_users(&self, room_id: RoomId) -> HashSet<UserId> {
        self.rooms.users_in(room_id)
    }

    /// 记录一次输入。重复输入只刷新时间戳。
    pub fn mark_typing(&self, room_id: RoomId, user_id: UserId) {
        let now = self.clock.now();
        self.typing.entry(room_id).or_default().insert(user_id, now);
    }

    /// 窗口内有输入且仍在房间内的用户
    pub fn typing_users(&self, room_id: RoomId) -> HashSet<UserId> {
        let now = self.clock.now();
        let window = self.window;

        let typing: HashSet<UserId> = match self.typing.get_mut(&room_id) {
            Some(mut users) => {
                users.retain(|_, last| now.signed_duration_since(*last) < window);
                users.keys().copied().collect()
            }
            None => return HashSet::new(),
        };
        self.typing.remove_if(&room_id, |_, users| users.is_empty());

        typing
            .into_iter()
            .filter(|user_id| self.rooms.contains_user(room_id, *user_id))
            .collect()
    }

    pub fn is_typing(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.typing_users(room_id).contains(&user_id)
    }

    /// 用户发送消息或离线后清除其输入状态
    pub fn clear_typing(&self, room_id: RoomId, user_id: UserId) {
        if let Some(mut users) = self.typing.get_mut(&room_id) {
            if users.remove(&user_id).is_some() {
                debug!(room_id = %room_id, user_id = %user_id, "清除输入状态");
            }
        }
        self.typing.remove_if(&room_id, |_, users| users.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection_registry::ConnectionRegistry;
    use domain::ConnectionId;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomDirectory>,
        clock: Arc<ManualClock>,
        presence: PresenceTracker,
        _queues: Vec<mpsc::Receiver<domain::ServerEvent>>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(50)));
            let rooms = Arc::new(RoomDirectory::new(registry.clone()));
            let clock = Arc::new(ManualClock::default());
            let presence =
                PresenceTracker::new(rooms.clone(), Duration::from_secs(3), clock.clone());
            Self {
                registry,
                rooms,
                clock,
                presence,
                _queues: Vec::new(),
            }
        }

        fn join(&mut self, room_id: RoomId, user_id: UserId) -> ConnectionId {
            let (tx, rx) = mpsc::channel(4);
            self._queues.push(rx);
            let id = self.registry.open(tx, user_id).unwrap();
            self.rooms.join(room_id, id).unwrap();
            id
        }
    }

    #[test]
    fn online_follows_room_membership() {
        let mut fx = Fixture::new();
        let room = RoomId::generate();
        let user = UserId::generate();

        assert!(!fx.presence.is_online(room, user));
        let conn = fx.join(room, user);
        assert!(fx.presence.is_online(room, user));
        assert_eq!(fx.presence.online_users(room), HashSet::from([user]));

        fx.rooms.leave(room, conn);
        assert!(!fx.presence.is_online(room, user));
    }

    #[test]
    fn typing_expires_after_the_window() {
        let mut fx = Fixture::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        fx.join(room, user);

        fx.presence.mark_typing(room, user);
        fx.clock.advance(chrono::Duration::milliseconds(2_999));
        assert!(fx.presence.is_typing(room, user));

        fx.clock.advance(chrono::Duration::milliseconds(1));
        assert!(fx.presence.typing_users(room).is_empty());
    }

    #[test]
    fn repeated_typing_refreshes_the_window() {
        let mut fx = Fixture::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        fx.join(room, user);

        fx.presence.mark_typing(room, user);
        fx.clock.advance(chrono::Duration::seconds(2));
        fx.presence.mark_typing(room, user);
        fx.clock.advance(chrono::Duration::seconds(2));

        assert_eq!(fx.presence.typing_users(room), HashSet::from([user]));
    }

    #[test]
    fn clear_typing_and_leaving_hide_the_indicator() {
        let mut fx = Fixture::new();
        let room = RoomId::generate();
        let alice = UserId::generate();
        let bob = UserId::generate();
        fx.join(room, alice);
        let bob_conn = fx.join(room, bob);

        fx.presence.mark_typing(room, alice);
        fx.presence.mark_typing(room, bob);

        fx.presence.clear_typing(room, alice);
        assert!(!fx.presence.is_typing(room, alice));

        fx.rooms.leave(room, bob_conn);
        assert!(!fx.presence.is_typing(room, bob));
    }

    #[test]
    fn closed_connection_is_offline_and_not_typing() {
        let mut fx = Fixture::new();
        let room = RoomId::generate();
        let user = UserId::generate();
        let conn = fx.join(room, user);
        fx.presence.mark_typing(room, user);

        fx.registry.close(conn);

        assert!(!fx.presence.is_online(room, user));
        assert!(fx.presence.online_users(room).is_empty());
        assert!(fx.presence.typing_users(room).is_empty());
    }
}
