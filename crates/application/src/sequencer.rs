use std::sync::Arc;

use dashmap::DashMap;
use domain::RoomId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 房间内的顺序许可
///
/// 持有许可期间，同一房间的其他持久化事件（新消息、编辑、删除）必须等待。
/// 许可需要一直持有到扇出完成，才能保证每个接收者看到的顺序与持久化顺序一致。
#[derive(Debug)]
pub struct SequencePermit {
    room_id: RoomId,
    guard: OwnedMutexGuard<u64>,
}

impl SequencePermit {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// 分配下一个顺序号（从 1 开始，房间内单调递增）
    pub fn next_sequence(&mut self) -> u64 {
        *self.guard += 1;
        *self.guard
    }

    /// 最近一次分配的顺序号
    pub fn current(&self) -> u64 {
        *self.guard
    }
}

/// 每个房间维护递增序列号，并串行化同一房间的持久化与扇出
///
/// 房间清空后通道会被回收，之后该房间的顺序号重新从 1 开始。
#[derive(Default)]
pub struct RoomSequencer {
    rooms: DashMap<RoomId, Arc<Mutex<u64>>>,
}

impl RoomSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, room_id: RoomId) -> SequencePermit {
        // 先克隆出 Arc 再等待，不跨 await 持有分片锁
        let lane = self.rooms.entry(room_id).or_default().clone();
        SequencePermit {
            room_id,
            guard: lane.lock_owned().await,
        }
    }

    /// `is_empty` 成立且没有许可在持有或等待时回收房间的通道。
    /// 判断在分片锁内完成，与同一房间的 `acquire` 互斥。
    pub fn release_if(&self, room_id: RoomId, is_empty: impl Fn() -> bool) -> bool {
        self.rooms
            .remove_if(&room_id, |_, lane| Arc::strong_count(lane) == 1 && is_empty())
            .is_some()
    }

    pub fn lane_count(&self) -> usize {
        self.rooms.len()
    }
}
