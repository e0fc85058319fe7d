//! 实时聊天核心。
//!
//! 维护连接、房间成员、在线与输入状态，把每个连接的入站事件路由成出站事件并投递，
//! 消息持久化和用户认证通过 [`MessageStore`] 与 [`UserDirectory`] 交给外部实现。

pub mod clock;
pub mod connection_registry;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod realtime_core;
pub mod repository;
pub mod room_directory;
pub mod router;
pub mod sequencer;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection_registry::{
    ClosedConnection, ConnectionRegistry, ConnectionState, SendFailure, Transport,
};
pub use dispatcher::{Delivery, DispatchReport, Dispatcher, FanOutReport, Outbox};
pub use error::RealtimeError;
pub use presence::PresenceTracker;
pub use realtime_core::{Core, CoreDependencies};
pub use repository::{DirectoryError, MessageStore, StoreError, UserDirectory};
pub use room_directory::{JoinOutcome, LeaveOutcome, PresenceChange, RoomDirectory};
pub use router::EventRouter;
pub use sequencer::{RoomSequencer, SequencePermit};
pub use session::ConnectionSession;

#[cfg(any(test, feature = "testing"))]
pub use repository::{MockMessageStore, MockUserDirectory};
