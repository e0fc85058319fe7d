//! 客户端与服务端之间的实时事件协议
//!
//! 线上格式为 JSON 文本帧，使用 `type` 字段区分事件，字段名为 camelCase。

pub mod client_event;
pub mod server_event;

pub use client_event::ClientEvent;
pub use server_event::{HistoryEntry, ServerEvent};
