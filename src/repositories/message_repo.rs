//! Message sinks for the example workload.
//!
//! `MessageRepository` writes to the tenant's `messages` table;
//! `MemoryMessageSink` keeps rows in process for the memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::models::{Message, NewMessage};
use crate::schema::messages;

/// Destination of `message_log` rows for one tenant
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Store one message, returning its id
    async fn append(&self, message: &str) -> AppResult<i64>;

    async fn count(&self) -> AppResult<usize>;
}

#[derive(Clone)]
pub struct MessageRepository {
    pool: AsyncDbPool,
}

impl MessageRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    /// Most recent messages first
    pub async fn latest(&self, limit: i64) -> AppResult<Vec<Message>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        messages::table
            .order(messages::id.desc())
            .limit(limit)
            .select(Message::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }
}

#[async_trait]
impl MessageSink for MessageRepository {
    async fn append(&self, message: &str) -> AppResult<i64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::insert_into(messages::table)
            .values(&NewMessage::new(message))
            .returning(messages::id)
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    async fn count(&self) -> AppResult<usize> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let total: i64 = messages::table
            .count()
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(usize::try_from(total).unwrap_or_default())
    }
}

/// In-process sink; cloning shares the same rows
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageSink {
    rows: Arc<DashMap<i64, String>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored messages ordered by id
    pub fn messages(&self) -> Vec<(i64, String)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        rows
    }
}

#[async_trait]
impl MessageSink for MemoryMessageSink {
    async fn append(&self, message: &str) -> AppResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.rows.insert(id, message.to_string());
        Ok(id)
    }

    async fn count(&self) -> AppResult<usize> {
        Ok(self.rows.len())
    }
}
