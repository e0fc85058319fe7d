use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, RoomId};

/// 客户端发往服务端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// 加入房间
    Join { room_id: RoomId },
    /// 离开房间
    Leave { room_id: RoomId },
    /// 发送消息
    Message { room_id: RoomId, body: String },
    /// 正在输入
    Typing { room_id: RoomId },
    /// 编辑自己发送的消息
    Edit {
        room_id: RoomId,
        message_id: MessageId,
        body: String,
    },
    /// 删除自己发送的消息
    Delete {
        room_id: RoomId,
        message_id: MessageId,
    },
    /// 已读标记
    MarkRead {
        room_id: RoomId,
        message_id: MessageId,
    },
    /// 拉取历史消息
    History {
        room_id: RoomId,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        before: Option<MessageId>,
    },
}

impl ClientEvent {
    /// 解析一帧 JSON 文本
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// 用于日志的事件名
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::Message { .. } => "message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::Edit { .. } => "edit",
            ClientEvent::Delete { .. } => "delete",
            ClientEvent::MarkRead { .. } => "markRead",
            ClientEvent::History { .. } => "history",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parses_tagged_camel_case_frames() {
        let room = Uuid::new_v4();
        let frame = format!(r#"{{"type":"message","roomId":"{room}","body":"hi"}}"#);
        let event = ClientEvent::from_json(&frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::Message {
                room_id: RoomId::from(room),
                body: "hi".to_string()
            }
        );
        assert_eq!(event.kind(), "message");
    }

    #[test]
    fn history_paging_fields_are_optional() {
        let room = Uuid::new_v4();
        let frame = format!(r#"{{"type":"history","roomId":"{room}"}}"#);
        let event = ClientEvent::from_json(&frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::History {
                room_id: RoomId::from(room),
                limit: None,
                before: None
            }
        );
    }

    #[test]
    fn rejects_frames_with_missing_fields() {
        let room = Uuid::new_v4();
        let frame = format!(r#"{{"type":"message","roomId":"{room}"}}"#);
        assert!(ClientEvent::from_json(&frame).is_err());
        assert!(ClientEvent::from_json(r#"{"type":"dance"}"#).is_err());
    }
}
