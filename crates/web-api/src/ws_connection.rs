//! WebSocket 传输
//!
//! 一个连接拆成三个任务：
//! - 写任务：把注册表投递到出站队列的事件序列化成文本帧
//! - 读任务：把客户端的文本帧放进入站队列
//! - 会话任务：按顺序处理入站队列
//!
//! 注册表丢弃出站队列的发送端（连接关闭或被回收）时写任务结束，随后整条连接结束。

use application::ConnectionSession;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::ServerEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

pub async fn serve(
    socket: WebSocket,
    session: ConnectionSession,
    mut outbound: mpsc::Receiver<ServerEvent>,
    inbound_capacity: usize,
) {
    let connection_id = session.connection_id();
    let (mut sender, mut incoming) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(inbound_capacity);
    let (pong_tx, mut pong_rx) = mpsc::channel::<Bytes>(8);

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let payload = match event.to_json() {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize websocket payload");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        tracing::warn!("Failed to send text message");
                        break;
                    }
                }
                Some(data) = pong_rx.recv() => {
                    if sender.send(WsMessage::Pong(data)).await.is_err() {
                        tracing::warn!("Failed to send pong message");
                        break;
                    }
                }
            }
        }
        let _ = sender.send(WsMessage::Close(None)).await;
        tracing::debug!("WebSocket发送任务结束");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            let frame = match message {
                WsMessage::Text(text) => text.as_str().to_owned(),
                // 二进制帧按 UTF-8 文本处理，非法内容会在会话里解析失败
                WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
                WsMessage::Ping(data) => {
                    if pong_tx.send(data).await.is_err() {
                        break;
                    }
                    continue;
                }
                WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => {
                    tracing::debug!("WebSocket收到关闭消息");
                    break;
                }
            };
            if inbound_tx.send(frame).await.is_err() {
                break;
            }
        }
        tracing::debug!("WebSocket接收任务结束");
    });

    let session_task = tokio::spawn(session.run(inbound_rx));

    // 写任务先结束说明连接已被注册表关闭或写失败，不再读取
    let writer_done = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            true
        }
        _ = &mut recv_task => false,
    };

    if let Err(err) = session_task.await {
        tracing::error!(connection_id = %connection_id, error = %err, "会话任务异常退出");
    }
    if !writer_done {
        let _ = send_task.await;
    }

    tracing::info!(connection_id = %connection_id, "WebSocket连接已断开");
}
