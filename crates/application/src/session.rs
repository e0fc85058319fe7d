//! 单个连接的会话
//!
//! 每个连接一个会话任务，按到达顺序逐个处理入站帧：上一个事件投递完成后才处理下一个，
//! 同一连接发出的两条消息不会被重排。

use domain::{ClientEvent, ConnectionId};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection_registry::{ConnectionState, Transport};
use crate::dispatcher::DispatchReport;
use crate::error::RealtimeError;
use crate::router::EventRouter;

pub struct ConnectionSession {
    router: EventRouter,
    connection_id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionSession {
    /// 认证并注册连接
    pub async fn open(
        router: EventRouter,
        transport: Transport,
        credential: &str,
    ) -> Result<Self, RealtimeError> {
        let connection_id = router.connect(transport, credential).await?;
        Ok(Self {
            router,
            connection_id,
            state: ConnectionState::Active,
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            // 写入失败时注册表会直接回收连接
            ConnectionState::Active if !self.router.core().registry().is_active(self.connection_id) => {
                ConnectionState::Closed
            }
            state => state,
        }
    }

    /// 解析并处理一个文本帧。无法解析的帧只回一个 `InvalidEvent` 错误，连接保持打开。
    pub async fn process_frame(&self, frame: &str) -> DispatchReport {
        let outbox = match ClientEvent::from_json(frame) {
            Ok(event) => self.router.handle(self.connection_id, event).await,
            Err(err) => {
                debug!(connection_id = %self.connection_id, error = %err, "无法解析的入站帧");
                EventRouter::reject(self.connection_id, &RealtimeError::InvalidEvent(err.to_string()))
            }
        };
        self.router.core().dispatcher().dispatch(outbox).await
    }

    pub async fn process(&self, event: ClientEvent) -> DispatchReport {
        let outbox = self.router.handle(self.connection_id, event).await;
        self.router.core().dispatcher().dispatch(outbox).await
    }

    /// 顺序消费入站队列，直到对端关闭或连接被回收，然后关闭连接
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        info!(connection_id = %self.connection_id, "会话开始");

        while let Some(frame) = inbound.recv().await {
            self.process_frame(&frame).await;
            if self.state() == ConnectionState::Closed {
                debug!(connection_id = %self.connection_id, "连接已被回收，停止处理入站帧");
                break;
            }
        }

        self.close().await;
    }

    /// Active → Closing → Closed。重复调用是空操作。
    pub async fn close(&mut self) -> DispatchReport {
        if self.state == ConnectionState::Closed {
            return DispatchReport::default();
        }
        self.state = ConnectionState::Closing;

        let outbox = self.router.disconnect(self.connection_id);
        let report = self.router.core().dispatcher().dispatch(outbox).await;

        self.state = ConnectionState::Closed;
        info!(connection_id = %self.connection_id, "会话结束");
        report
    }
}
