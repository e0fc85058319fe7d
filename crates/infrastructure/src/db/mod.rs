//! Database utilities (Core DB Layer)

use sqlx::{Pool, Postgres};
use thiserror::Error;

use crate::migrations::MIGRATOR;

pub mod message_store;

pub type DbPool = Pool<Postgres>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub struct Db;

impl Db {
    pub async fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool, sqlx::Error> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_size)
            .connect(database_url)
            .await
    }

    /// 建立连接池并执行迁移
    pub async fn connect(database_url: &str, max_size: u32) -> Result<DbPool, DbError> {
        let pool = Self::create_pool(database_url, max_size).await?;
        MIGRATOR.run(&pool).await?;
        Ok(pool)
    }
}
