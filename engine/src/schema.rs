//! Table schemas and DDL derivation.
//!
//! A [`TableSchema`] is derived from synthesized columns. When no column is
//! declared as primary key, a synthetic auto-increment `id` column is
//! prepended. If a declared column already uses that name, the key is
//! prefixed with underscores until it is free. DDL is always "create if missing"; existing tables are never
//! altered.

use crate::column::SYNTHETIC_KEY;
use crate::{ColumnDescriptor, TableName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Schema of a local table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Columns in declaration order, including any synthetic key
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    /// Build a schema, applying the synthetic key rule.
    pub fn derive(name: impl Into<TableName>, columns: Vec<ColumnDescriptor>) -> Self {
        let has_key = columns.iter().any(|c| c.is_primary_key);

        let mut all = Vec::with_capacity(columns.len() + 1);
        if !has_key {
            let mut key = ColumnDescriptor::synthetic_key();
            key.name = synthetic_key_name(&columns);
            all.push(key);
        }
        // Declared columns never carry auto-increment; only the synthetic key may.
        all.extend(columns.into_iter().map(|mut c| {
            c.is_auto_increment = false;
            c
        }));

        Self {
            name: name.into(),
            columns: all,
        }
    }

    /// Whether the schema carries the synthetic key.
    pub fn has_synthetic_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_auto_increment)
    }

    /// Columns that are written from response rows (everything but the synthetic key).
    pub fn data_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_auto_increment)
    }

    /// Get a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema.
    pub fn create_sql(&self) -> String {
        let mut defs: Vec<String> = Vec::with_capacity(self.columns.len() + 1);
        let keys: Vec<&ColumnDescriptor> =
            self.columns.iter().filter(|c| c.is_primary_key).collect();

        for column in &self.columns {
            if column.is_auto_increment {
                defs.push(format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                    quote_ident(&column.name)
                ));
                continue;
            }
            let mut def = format!("{} {}", quote_ident(&column.name), column.storage_type);
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
        }

        if !self.has_synthetic_key() && !keys.is_empty() {
            let names: Vec<String> = keys.iter().map(|c| quote_ident(&c.name)).collect();
            defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            defs.join(", ")
        )
    }

    /// `DROP TABLE IF EXISTS` statement for this table.
    pub fn drop_sql(name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(name))
    }

    /// Compare this (persisted) schema against freshly observed columns.
    pub fn drift(&self, observed: &[ColumnDescriptor]) -> SchemaDrift {
        let persisted: HashSet<String> = self
            .data_columns()
            .map(|c| c.name.to_ascii_lowercase())
            .collect();
        let fresh: HashSet<String> = observed
            .iter()
            .map(|c| c.name.to_ascii_lowercase())
            .collect();

        let added = observed
            .iter()
            .filter(|c| !persisted.contains(&c.name.to_ascii_lowercase()))
            .map(|c| c.name.clone())
            .collect();
        let missing = self
            .data_columns()
            .filter(|c| !fresh.contains(&c.name.to_ascii_lowercase()))
            .map(|c| c.name.clone())
            .collect();

        SchemaDrift { added, missing }
    }
}

/// Difference between a persisted table and a freshly observed column set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDrift {
    /// Observed columns the table does not have
    pub added: Vec<String>,
    /// Table columns absent from the observation
    pub missing: Vec<String>,
}

impl SchemaDrift {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty()
    }
}

/// First free name for the synthetic key, compared case-insensitively.
fn synthetic_key_name(columns: &[ColumnDescriptor]) -> String {
    let mut name = SYNTHETIC_KEY.to_string();
    while columns.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
        name.insert(0, '_');
    }
    name
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
