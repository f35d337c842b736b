//! Table materialization against the local store.

use super::LocalStore;
use sqlx::Row;
use stockpile_engine::{ColumnDescriptor, StorageType, TableSchema};

/// Creates, inspects and drops the dynamic tables.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    store: LocalStore,
}

impl SchemaManager {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Whether a table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result: (bool,) = sqlx::query_as(
            r#"SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)"#,
        )
        .bind(name)
        .fetch_one(self.store.pool())
        .await?;

        Ok(result.0)
    }

    /// Create the table if it is missing. Returns whether it was created.
    ///
    /// An existing table is never altered. If its columns differ from the
    /// observed ones the drift is logged and the table is left as is.
    pub async fn ensure_table(
        &self,
        name: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<bool, sqlx::Error> {
        if let Some(existing) = self.get_schema(name).await? {
            let drift = existing.drift(&columns);
            if !drift.is_empty() {
                tracing::warn!(
                    table = %name,
                    added = ?drift.added,
                    missing = ?drift.missing,
                    "Schema drift detected, keeping existing table"
                );
            }
            return Ok(false);
        }

        let schema = TableSchema::derive(name, columns);
        sqlx::query(&schema.create_sql())
            .execute(self.store.pool())
            .await?;

        tracing::info!(
            table = %name,
            columns = schema.columns.len(),
            synthetic_key = schema.has_synthetic_key(),
            "Created table"
        );
        Ok(true)
    }

    /// Read a table's schema back from the store.
    pub async fn get_schema(&self, name: &str) -> Result<Option<TableSchema>, sqlx::Error> {
        let sql: Option<(String,)> = sqlx::query_as(
            r#"SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1"#,
        )
        .bind(name)
        .fetch_optional(self.store.pool())
        .await?;

        let Some((sql,)) = sql else {
            return Ok(None);
        };
        // AUTOINCREMENT is only legal on a single INTEGER PRIMARY KEY column,
        // which can only be the synthetic key.
        let autoincrement = sql.to_ascii_uppercase().contains("AUTOINCREMENT");

        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1) ORDER BY cid"#,
        )
        .bind(name)
        .fetch_all(self.store.pool())
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let column_name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let pk: i64 = row.try_get("pk")?;

            let is_primary_key = pk > 0;
            columns.push(ColumnDescriptor {
                is_auto_increment: autoincrement && is_primary_key,
                storage_type: storage_type(&declared),
                source_type: declared.to_ascii_lowercase(),
                nullable: not_null == 0 && !is_primary_key,
                is_primary_key,
                name: column_name,
            });
        }

        Ok(Some(TableSchema {
            name: name.to_string(),
            columns,
        }))
    }

    /// Drop a table. Returns whether it existed.
    pub async fn drop_table(&self, name: &str) -> Result<bool, sqlx::Error> {
        if !self.table_exists(name).await? {
            return Ok(false);
        }
        sqlx::query(&TableSchema::drop_sql(name))
            .execute(self.store.pool())
            .await?;
        tracing::info!(table = %name, "Dropped table");
        Ok(true)
    }

    /// Run auxiliary DDL statements. Failures are logged and skipped.
    ///
    /// Returns how many statements succeeded.
    pub async fn run_auxiliary(&self, table: &str, statements: &[String]) -> usize {
        let mut applied = 0;
        for statement in statements {
            match sqlx::query(statement).execute(self.store.pool()).await {
                Ok(_) => applied += 1,
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "Auxiliary DDL failed");
                }
            }
        }
        applied
    }
}

fn storage_type(declared: &str) -> StorageType {
    match declared.to_ascii_uppercase().as_str() {
        "INTEGER" => StorageType::Integer,
        "REAL" => StorageType::Real,
        "BLOB" => StorageType::Blob,
        _ => StorageType::Text,
    }
}
