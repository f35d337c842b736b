//! Database operations for the sync_state table.

use super::LocalStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use stockpile_engine::catalog::INITIAL_SYNC_TOKEN;
use stockpile_engine::UrlContext;

/// Format of the last-sync token sent to the server.
pub const SYNC_TOKEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Last successful sync of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateEntry {
    pub api_key: String,
    pub last_sync_token: String,
    pub last_synced_at: String,
    pub last_records: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SyncStateEntry {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SyncStateEntry {
            api_key: row.try_get("api_key")?,
            last_sync_token: row.try_get("last_sync_token")?,
            last_synced_at: row.try_get("last_synced_at")?,
            last_records: row.try_get("last_records")?,
        })
    }
}

/// Format a point in time as a sync token.
pub fn sync_token(at: DateTime<Utc>) -> String {
    at.format(SYNC_TOKEN_FORMAT).to_string()
}

/// Reads and records per-endpoint sync bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    store: LocalStore,
}

impl SyncStateRepository {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, api_key: &str) -> Result<Option<SyncStateEntry>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT api_key, last_sync_token, last_synced_at, last_records
            FROM sync_state
            WHERE api_key = ?1
            "#,
        )
        .bind(api_key)
        .fetch_optional(self.store.pool())
        .await
    }

    pub async fn all(&self) -> Result<Vec<SyncStateEntry>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT api_key, last_sync_token, last_synced_at, last_records
            FROM sync_state
            ORDER BY api_key
            "#,
        )
        .fetch_all(self.store.pool())
        .await
    }

    /// Record a successful sync that started at `started`.
    ///
    /// The token is the start of the fetch, so rows changed while it was in
    /// flight are picked up by the next incremental sync.
    pub async fn record_success(
        &self,
        api_key: &str,
        started: DateTime<Utc>,
        records: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (api_key, last_sync_token, last_synced_at, last_records)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (api_key) DO UPDATE SET
                last_sync_token = excluded.last_sync_token,
                last_synced_at = excluded.last_synced_at,
                last_records = excluded.last_records
            "#,
        )
        .bind(api_key)
        .bind(sync_token(started))
        .bind(Utc::now().to_rfc3339())
        .bind(records as i64)
        .execute(self.store.pool())
        .await?;

        Ok(())
    }

    /// Build the URL context for an endpoint. An endpoint that never
    /// synced gets the initial token and a full refresh.
    pub async fn url_context(
        &self,
        api_key: &str,
        org_id: Option<&str>,
        default_org_id: Option<&str>,
    ) -> Result<UrlContext, sqlx::Error> {
        let entry = self.get(api_key).await?;
        Ok(UrlContext {
            org_id: org_id.map(str::to_string),
            default_org_id: default_org_id.map(str::to_string),
            full_refresh: entry.is_none(),
            last_sync_token: Some(
                entry
                    .map(|e| e.last_sync_token)
                    .unwrap_or_else(|| INITIAL_SYNC_TOKEN.to_string()),
            ),
        })
    }
}
