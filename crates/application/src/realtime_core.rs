//! 实时核心的聚合根
//!
//! 进程内只构造一次，持有连接注册表、房间目录、在线状态等共享状态，
//! 以 `Arc` 传给每条请求路径（WebSocket 会话、HTTP 查询）。

use std::sync::Arc;

use config::RealtimeConfig;

use crate::clock::Clock;
use crate::connection_registry::ConnectionRegistry;
use crate::dispatcher::Dispatcher;
use crate::presence::PresenceTracker;
use crate::repository::{MessageStore, UserDirectory};
use crate::room_directory::RoomDirectory;
use crate::router::EventRouter;
use crate::sequencer::RoomSequencer;

pub struct CoreDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub message_store: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct Core {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
    presence: Arc<PresenceTracker>,
    sequencer: Arc<RoomSequencer>,
    dispatcher: Dispatcher,
    deps: CoreDependencies,
    settings: RealtimeConfig,
}

impl Core {
    pub fn new(deps: CoreDependencies, settings: RealtimeConfig) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new(settings.send_timeout()));
        let rooms = Arc::new(RoomDirectory::new(registry.clone()));
        let presence = Arc::new(PresenceTracker::new(
            rooms.clone(),
            settings.typing_window(),
            deps.clock.clone(),
        ));
        let sequencer = Arc::new(RoomSequencer::new());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            rooms.clone(),
            presence.clone(),
            sequencer.clone(),
        );

        Arc::new(Self {
            registry,
            rooms,
            presence,
            sequencer,
            dispatcher,
            deps,
            settings,
        })
    }

    pub fn router(self: &Arc<Self>) -> EventRouter {
        EventRouter::new(self.clone())
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn sequencer(&self) -> &RoomSequencer {
        &self.sequencer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn user_directory(&self) -> &dyn UserDirectory {
        self.deps.user_directory.as_ref()
    }

    pub fn message_store(&self) -> &dyn MessageStore {
        self.deps.message_store.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.deps.clock.as_ref()
    }

    pub fn settings(&self) -> &RealtimeConfig {
        &self.settings
    }
}
