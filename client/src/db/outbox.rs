//! Database operations for the outbound_transactions table.
//!
//! The client only queues transactions. Delivery is driven from outside this
//! crate through [`Outbox::pending`], [`Outbox::mark_sent`] and
//! [`Outbox::mark_attempt_failed`].

use super::LocalStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// Delivery status of an outbound transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundStatus::Pending => "PENDING",
            OutboundStatus::Sent => "SENT",
            OutboundStatus::Failed => "FAILED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboundStatus::Pending),
            "SENT" => Some(OutboundStatus::Sent),
            "FAILED" => Some(OutboundStatus::Failed),
            _ => None,
        }
    }
}

/// A transactional write waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTransaction {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: OutboundStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for OutboundTransaction {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        Ok(OutboundTransaction {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            payload: serde_json::from_str(&payload).map_err(|e| sqlx::Error::ColumnDecode {
                index: "payload".to_string(),
                source: Box::new(e),
            })?,
            status: OutboundStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown outbound status '{}'", status).into(),
            })?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, kind, payload, status, retry_count, last_error, created_at, updated_at FROM outbound_transactions";

/// The outbox of outbound transactional writes.
#[derive(Debug, Clone)]
pub struct Outbox {
    store: LocalStore,
}

impl Outbox {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Queue a transaction for delivery.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<OutboundTransaction, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO outbound_transactions (id, kind, payload, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(payload.to_string())
        .bind(OutboundStatus::Pending.as_str())
        .bind(&now)
        .execute(self.store.pool())
        .await?;

        tracing::debug!(id = %id, kind = %kind, "Queued outbound transaction");

        Ok(OutboundTransaction {
            id,
            kind: kind.to_string(),
            payload: payload.clone(),
            status: OutboundStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Every transaction, oldest first.
    pub async fn list(&self) -> Result<Vec<OutboundTransaction>, sqlx::Error> {
        sqlx::query_as(&format!("{} ORDER BY created_at, id", SELECT_COLUMNS))
            .fetch_all(self.store.pool())
            .await
    }

    /// Transactions still waiting for delivery, oldest first.
    pub async fn pending(&self) -> Result<Vec<OutboundTransaction>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{} WHERE status = ?1 ORDER BY created_at, id",
            SELECT_COLUMNS
        ))
        .bind(OutboundStatus::Pending.as_str())
        .fetch_all(self.store.pool())
        .await
    }

    /// Mark a transaction delivered. Returns false if it does not exist.
    pub async fn mark_sent(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_transactions
            SET status = ?2, last_error = NULL, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(OutboundStatus::Sent.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed delivery attempt. The transaction stays pending
    /// until `max_attempts` attempts have failed, then it is FAILED.
    pub async fn mark_attempt_failed(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_transactions
            SET retry_count = retry_count + 1,
                last_error = ?2,
                status = CASE WHEN retry_count + 1 >= ?3 THEN ?4 ELSE status END,
                updated_at = ?5
            WHERE id = ?1 AND status = ?6
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts as i64)
        .bind(OutboundStatus::Failed.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(OutboundStatus::Pending.as_str())
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(id = %id, error = %error, "Outbound delivery failed");
        }
        Ok(result.rows_affected() > 0)
    }
}
