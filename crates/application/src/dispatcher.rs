//! 事件投递
//!
//! 路由器只产出待投递的事件列表（[`Outbox`]），由 [`Dispatcher`] 写入各连接。
//! 单个接收者的失败相互隔离：写入失败的连接被回收，其余接收者照常投递，不重试。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{ConnectionId, RoomId, ServerEvent};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::connection_registry::ConnectionRegistry;
use crate::presence::PresenceTracker;
use crate::room_directory::{PresenceChange, RoomDirectory};
use crate::sequencer::{RoomSequencer, SequencePermit};

/// 一次投递：同一个事件发给一组连接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub targets: Vec<ConnectionId>,
    pub event: ServerEvent,
}

/// 路由一个入站事件后产生的全部出站事件，按顺序投递
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
    /// 持久化事件的房间顺序许可，投递完成后才释放
    permit: Option<SequencePermit>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只回复给一个连接
    pub fn reply(connection_id: ConnectionId, event: ServerEvent) -> Self {
        let mut outbox = Self::new();
        outbox.push(vec![connection_id], event);
        outbox
    }

    pub fn push(&mut self, targets: impl IntoIterator<Item = ConnectionId>, event: ServerEvent) {
        let targets: Vec<ConnectionId> = targets.into_iter().collect();
        if !targets.is_empty() {
            self.deliveries.push(Delivery { targets, event });
        }
    }

    pub fn hold(&mut self, permit: SequencePermit) {
        self.permit = Some(permit);
    }

    pub fn is_sequenced(&self) -> bool {
        self.permit.is_some()
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// 某个连接会收到的事件（按投递顺序）
    pub fn events_for(&self, connection_id: ConnectionId) -> Vec<&ServerEvent> {
        self.deliveries
            .iter()
            .filter(|delivery| delivery.targets.contains(&connection_id))
            .map(|delivery| &delivery.event)
            .collect()
    }
}

/// 一次扇出的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    /// 本次写入失败而被回收的连接
    pub reaped: Vec<ConnectionId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub reaped: Vec<ConnectionId>,
}

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
    presence: Arc<PresenceTracker>,
    sequencer: Arc<RoomSequencer>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomDirectory>,
        presence: Arc<PresenceTracker>,
        sequencer: Arc<RoomSequencer>,
    ) -> Self {
        Self {
            registry,
            rooms,
            presence,
            sequencer,
        }
    }

    /// 房间已没有存活成员时回收它的顺序通道
    pub fn release_room_if_empty(&self, room_id: RoomId) {
        let rooms = &self.rooms;
        if self
            .sequencer
            .release_if(room_id, || rooms.users_in(room_id).is_empty())
        {
            debug!(room_id = %room_id, lanes = self.sequencer.lane_count(), "房间已清空，回收顺序通道");
        }
    }

    /// 把同一个事件并发写入每个目标连接。已关闭的连接直接跳过。
    pub async fn fan_out(&self, targets: &[ConnectionId], event: &ServerEvent) -> FanOutReport {
        let sends = targets
            .iter()
            .map(|id| self.registry.send(*id, event.clone()));
        let results = join_all(sends).await;

        let mut report = FanOutReport::default();
        for result in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(failure) if failure.reaped() => report.reaped.push(failure.connection_id()),
                Err(_) => {}
            }
        }

        if !report.reaped.is_empty() {
            warn!(
                targets = targets.len(),
                reaped = report.reaped.len(),
                "部分接收者写入失败"
            );
        }
        report
    }

    /// 按顺序投递发件箱，然后对被回收的连接做级联清理
    pub async fn dispatch(&self, outbox: Outbox) -> DispatchReport {
        let Outbox { deliveries, permit } = outbox;

        let mut report = DispatchReport::default();
        for delivery in &deliveries {
            let fan_out = self.fan_out(&delivery.targets, &delivery.event).await;
            report.delivered += fan_out.delivered;
            report.reaped.extend(fan_out.reaped);
        }
        // 持久化事件已全部写入各队列，释放房间顺序
        drop(permit);

        let cascade = self.cascade(report.reaped.clone()).await;
        report.delivered += cascade.delivered;
        report.reaped.extend(cascade.reaped);

        debug!(
            delivered = report.delivered,
            reaped = report.reaped.len(),
            "投递完成"
        );
        report
    }

    async fn cascade(&self, reaped: Vec<ConnectionId>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut seen: HashSet<ConnectionId> = HashSet::new();
        let mut worklist = reaped;

        while let Some(connection_id) = worklist.pop() {
            if !seen.insert(connection_id) {
                continue;
            }
            let changes = self.rooms.remove_connection(connection_id);
            for change in changes {
                let fan_out = self.broadcast_presence(change).await;
                report.delivered += fan_out.delivered;
                report.reaped.extend(fan_out.reaped.iter().copied());
                worklist.extend(fan_out.reaped);
            }
        }
        report
    }

    async fn broadcast_presence(&self, change: PresenceChange) -> FanOutReport {
        if !change.online {
            self.presence.clear_typing(change.room_id, change.user_id);
            self.release_room_if_empty(change.room_id);
        }
        let targets: Vec<ConnectionId> = self.rooms.members_of(change.room_id).into_iter().collect();
        let event = ServerEvent::PresenceChanged {
            room_id: change.room_id,
            user_id: change.user_id,
            online: change.online,
        };
        self.fan_out(&targets, &event).await
    }
}
