//! 基础设施层实现。
//!
//! 提供消息存储（内存 / PostgreSQL）与 JWT 用户目录，实现应用层定义的协作者接口。

pub mod auth;
pub mod db;
pub mod memory_store;
pub mod migrations;

pub use auth::{Claims, JwtUserDirectory};
pub use db::{message_store::PgMessageStore, Db, DbError, DbPool};
pub use memory_store::InMemoryMessageStore;
pub use migrations::MIGRATOR;
