#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{Core, CoreDependencies, SystemClock};
use config::{JwtConfig, RealtimeConfig};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use infrastructure::{InMemoryMessageStore, JwtUserDirectory};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState};

/// 在随机端口上运行的完整服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub directory: Arc<JwtUserDirectory>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let directory = Arc::new(JwtUserDirectory::new(JwtConfig::default()));
        let core = Core::new(
            CoreDependencies {
                user_directory: directory.clone(),
                message_store: Arc::new(InMemoryMessageStore::new()),
                clock: Arc::new(SystemClock),
            },
            RealtimeConfig::default(),
        );
        let app = router(AppState::new(core));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // 等待服务器启动
        sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            directory,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.directory.issue_token(user_id).expect("issue token")
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub async fn connect(&self, user_id: UserId) -> WsClient {
        let (stream, _) = connect_async(self.ws_url(&self.token(user_id)))
            .await
            .expect("websocket connect");
        WsClient { stream }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("send frame");
    }

    /// 读取下一个 JSON 事件，跳过控制帧
    pub async fn next_event(&mut self) -> Value {
        loop {
            let message = timeout(Duration::from_secs(2), self.stream.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("event json");
            }
        }
    }

    /// 读取事件直到出现指定类型
    pub async fn expect_event(&mut self, kind: &str) -> Value {
        loop {
            let event = self.next_event().await;
            if event["type"] == kind {
                return event;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
