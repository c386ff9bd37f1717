//! Reconcile job queue: the fan-out seam between ingestion and the
//! transform worker.
//!
//! Backed by a Postgres table claimed with `FOR UPDATE SKIP LOCKED`, so
//! any number of workers can drain it without coordination. Tests use
//! `MemoryQueue`.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

/// Everything the transform worker needs for one order pass: the three
/// raw payloads plus the run's provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileMessage {
    pub uuid: String,
    pub timestamp: String,
    pub pdv_pedido_data: Value,
    pub produto_data: Vec<Value>,
    pub pedidos_pesquisa_data: Value,
}

/// Publish side of the queue; the only part ingestion sees.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, msg: &ReconcileMessage) -> Result<()>;
}

/// A message claimed for processing, identified for completion/failure.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: i64,
    pub message: ReconcileMessage,
}

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    table: String,
}

impl PgQueue {
    pub async fn new(pool: PgPool, table: &str) -> Result<Self> {
        let queue = Self {
            pool,
            table: table.to_string(),
        };
        queue.ensure_table().await?;
        Ok(queue)
    }

    async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                payload JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                claimed_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Claim the oldest pending job, skipping rows other workers hold.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        let sql = format!(
            "UPDATE {t} SET status = 'processing', claimed_at = now()
             WHERE id = (
                 SELECT id FROM {t}
                 WHERE status = 'pending'
                 ORDER BY id
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING id, payload",
            t = self.table
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let payload: Value = row.try_get("payload")?;
                let message: ReconcileMessage = serde_json::from_value(payload)
                    .with_context(|| format!("decoding queued job {id}"))?;
                debug!(target: "queue", job = id, "claimed job");
                Ok(Some(ClaimedJob { id, message }))
            }
        }
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'done', finished_at = now() WHERE id = $1",
            self.table
        );
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    /// Park a job as failed with its error; failed jobs are left for
    /// operator inspection, not retried automatically.
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'failed', error = $2, finished_at = now() WHERE id = $1",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for PgQueue {
    async fn publish(&self, msg: &ReconcileMessage) -> Result<()> {
        let sql = format!("INSERT INTO {} (payload) VALUES ($1)", self.table);
        sqlx::query(&sql)
            .bind(serde_json::to_value(msg)?)
            .execute(&self.pool)
            .await?;
        debug!(target: "queue", uuid = %msg.uuid, "enqueued reconcile job");
        Ok(())
    }
}

/// In-memory FIFO for tests.
#[derive(Default)]
pub struct MemoryQueue {
    pub messages: Mutex<VecDeque<ReconcileMessage>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<ReconcileMessage> {
        self.messages.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Notifier for MemoryQueue {
    async fn publish(&self, msg: &ReconcileMessage) -> Result<()> {
        self.messages.lock().unwrap().push_back(msg.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_round_trips_through_json() {
        let msg = ReconcileMessage {
            uuid: "u".to_string(),
            timestamp: "2024-03-05T12:00:00Z".to_string(),
            pdv_pedido_data: json!({"retorno": {}}),
            produto_data: vec![json!({"retorno": {}})],
            pedidos_pesquisa_data: json!({"retorno": {}}),
        };
        let encoded = serde_json::to_value(&msg).unwrap();
        let decoded: ReconcileMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.uuid, "u");
        assert_eq!(decoded.produto_data.len(), 1);
    }
}
