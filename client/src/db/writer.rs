//! Chunked bulk writes with per-row fallback.

use super::LocalStore;
use crate::error::SyncError;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::query::Query;
use std::collections::HashSet;
use stockpile_engine::schema::quote_ident;
use stockpile_engine::{Row, TableName};

/// Rows per bulk statement.
pub const CHUNK_SIZE: usize = 100;

/// Conflict handling for inserted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Latest row wins (snapshot and profile tables)
    Replace,
    /// First row wins (additive tables)
    Ignore,
}

impl InsertPolicy {
    fn verb(&self) -> &'static str {
        match self {
            InsertPolicy::Replace => "INSERT OR REPLACE",
            InsertPolicy::Ignore => "INSERT OR IGNORE",
        }
    }
}

/// Writes adapted rows into the dynamic tables.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    store: LocalStore,
    snapshot_tables: HashSet<TableName>,
    chunk_size: usize,
}

impl BatchWriter {
    /// Create a writer. Tables listed in `snapshot_tables` are fully
    /// replaced on every write.
    pub fn new(store: LocalStore, snapshot_tables: impl IntoIterator<Item = TableName>) -> Self {
        Self {
            store,
            snapshot_tables: snapshot_tables.into_iter().collect(),
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Builder-style method overriding the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn is_snapshot(&self, table: &str) -> bool {
        self.snapshot_tables.contains(table)
    }

    pub fn policy_for(&self, table: &str) -> InsertPolicy {
        if self.is_snapshot(table) {
            InsertPolicy::Replace
        } else {
            InsertPolicy::Ignore
        }
    }

    /// Write rows into `table`. Returns how many rows were written.
    ///
    /// Each chunk goes out as one multi-row statement. If that statement
    /// fails, the chunk's rows are written one by one and only the rows that
    /// succeed are counted. A chunk escalates to an error only when none of
    /// its rows can be written.
    ///
    /// The whole write is one transaction. On error nothing is kept, so a
    /// snapshot table keeps its previous contents.
    pub async fn upsert(&self, table: &str, rows: &[Row]) -> Result<u64, SyncError> {
        let policy = self.policy_for(table);
        let mut tx = self.store.pool().begin().await?;

        if self.is_snapshot(table) {
            let deleted = sqlx::query(&format!("DELETE FROM {}", quote_ident(table)))
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tracing::debug!(table = %table, deleted, "Cleared snapshot table");
        }

        let mut inserted: u64 = 0;
        for (index, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let columns = chunk_columns(chunk);
            match insert_many(&mut *tx, table, policy, &columns, chunk).await {
                Ok(()) => {
                    inserted += chunk.len() as u64;
                    tracing::debug!(table = %table, chunk = index, rows = chunk.len(), "Wrote chunk");
                }
                Err(e) if is_store_failure(&e) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        table = %table,
                        chunk = index,
                        error = %e,
                        "Bulk insert failed, falling back to single rows"
                    );
                    let written = insert_each(&mut *tx, table, policy, chunk).await?;
                    if written == 0 {
                        tx.rollback().await?;
                        return Err(SyncError::WriteFailure {
                            table: table.to_string(),
                            message: format!(
                                "no row of chunk {} could be written ({} rows rolled back): {}",
                                index, inserted, e
                            ),
                        });
                    }
                    inserted += written;
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

async fn insert_many(
    conn: &mut SqliteConnection,
    table: &str,
    policy: InsertPolicy,
    columns: &[String],
    rows: &[Row],
) -> Result<(), sqlx::Error> {
    let sql = insert_sql(table, policy, columns, rows.len());
    let mut query = sqlx::query(&sql);
    for row in rows {
        for column in columns {
            query = bind_value(query, row.get(column).unwrap_or(&Value::Null));
        }
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

async fn insert_each(
    conn: &mut SqliteConnection,
    table: &str,
    policy: InsertPolicy,
    rows: &[Row],
) -> Result<u64, SyncError> {
    let mut written = 0;
    for row in rows {
        let columns: Vec<String> = row.keys().cloned().collect();
        match insert_many(conn, table, policy, &columns, std::slice::from_ref(row)).await {
            Ok(()) => written += 1,
            Err(e) if is_store_failure(&e) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Row rejected");
            }
        }
    }
    Ok(written)
}

fn is_store_failure(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
    )
}

/// Union of the keys of a chunk's rows, in first-seen order.
fn chunk_columns(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn insert_sql(table: &str, policy: InsertPolicy, columns: &[String], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders; rows].join(", ");

    if columns.is_empty() {
        return format!("{} INTO {} DEFAULT VALUES", policy.verb(), quote_ident(table));
    }
    format!(
        "{} INTO {} ({}) VALUES {}",
        policy.verb(),
        quote_ident(table),
        names.join(", "),
        values
    )
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}
