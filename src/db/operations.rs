use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::models::{MessageReceipt, NewMessage};
use crate::error::DatabaseError;

/// Durable storage for chat messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `message` and returns its generated id and server timestamp.
    async fn create_message(&self, message: &NewMessage) -> Result<MessageReceipt, DatabaseError>;
}

pub struct PgMessageStore {
    pool: Arc<PgPool>,
}

impl PgMessageStore {
    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create_message(&self, message: &NewMessage) -> Result<MessageReceipt, DatabaseError> {
        let (id, time): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO messages (user_id, trainer_id, message, service_id, is_to_user)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id::BIGINT, time::TIMESTAMPTZ
            "#,
        )
        .bind(message.user_id)
        .bind(message.trainer_id)
        .bind(message.message.as_deref())
        .bind(message.service_id)
        .bind(message.is_to_user)
        .fetch_one(self.pool.as_ref())
        .await?;

        info!("Created message {} (user {}, trainer {})", id, message.user_id, message.trainer_id);

        Ok(MessageReceipt { id, time })
    }
}
