//! 聊天室实时核心的领域模型
//!
//! 包含连接、用户、房间、消息的标识与实体，以及客户端/服务端事件的协议定义。

pub mod errors;
pub mod events;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use value_objects::*;
