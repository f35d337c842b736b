//! Column synthesis.
//!
//! Turns server-declared column metadata (or the header row of a table-matrix
//! response) into [`ColumnDescriptor`]s with a local storage type.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Suffix on a table-matrix header that marks the primary key column.
pub const PK_MARKER: &str = "_PK";

/// Name of the synthetic key column added to tables without a declared key.
pub const SYNTHETIC_KEY: &str = "id";

/// Local storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    Text,
    Integer,
    Real,
    Blob,
}

impl StorageType {
    /// Map a remote type name to a storage type.
    ///
    /// Unknown type names fall back to [`StorageType::Text`].
    pub fn from_source(source_type: &str) -> Self {
        match source_type.trim().to_ascii_lowercase().as_str() {
            "string" => StorageType::Text,
            "number" | "integer" | "bigint" => StorageType::Integer,
            "float" | "double" | "decimal" => StorageType::Real,
            "boolean" => StorageType::Integer,
            "date" | "datetime" | "timestamp" => StorageType::Text,
            "blob" => StorageType::Blob,
            _ => StorageType::Text,
        }
    }

    /// SQL type keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            StorageType::Text => "TEXT",
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A column as declared by a metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
    #[serde(default, alias = "isPrimaryKey")]
    pub primary_key: bool,
    #[serde(default)]
    pub nullable: Option<bool>,
}

impl SourceColumn {
    /// Create a column declaration with a type.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: Some(source_type.into()),
            primary_key: false,
            nullable: None,
        }
    }

    /// Builder-style method flagging the column as primary key.
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Description of a local column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: String,
    pub storage_type: StorageType,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
}

impl ColumnDescriptor {
    /// Create a nullable, non-key column, inferring the storage type.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        let source_type = source_type.into();
        Self {
            name: name.into(),
            storage_type: StorageType::from_source(&source_type),
            source_type,
            nullable: true,
            is_primary_key: false,
            is_auto_increment: false,
        }
    }

    /// Builder-style method marking this column as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// The synthetic auto-increment key column.
    pub fn synthetic_key() -> Self {
        Self {
            name: SYNTHETIC_KEY.to_string(),
            source_type: "integer".to_string(),
            storage_type: StorageType::Integer,
            nullable: false,
            is_primary_key: true,
            is_auto_increment: true,
        }
    }
}

/// Split a trailing primary-key marker off a column name.
///
/// Returns the stripped name and whether the marker was present.
pub fn strip_pk_marker(name: &str) -> (&str, bool) {
    let trimmed = name.trim();
    let len = trimmed.len();
    if len >= PK_MARKER.len()
        && trimmed.is_char_boundary(len - PK_MARKER.len())
        && trimmed[len - PK_MARKER.len()..].eq_ignore_ascii_case(PK_MARKER)
    {
        (&trimmed[..len - PK_MARKER.len()], true)
    } else {
        (trimmed, false)
    }
}

/// Synthesize columns from JSON metadata.
pub fn from_metadata(columns: &[SourceColumn]) -> Result<Vec<ColumnDescriptor>> {
    if columns.is_empty() {
        return Err(Error::InvalidMetadata("metadata declares no columns".into()));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let (name, marked) = strip_pk_marker(&column.name);
        check_name(name, index, &mut seen)?;

        let source_type = match column.source_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(Error::InvalidMetadata(format!(
                    "column '{}' has no declared type",
                    name
                )))
            }
        };

        let mut descriptor = ColumnDescriptor::new(name, source_type);
        if column.primary_key || marked {
            descriptor = descriptor.primary_key();
        } else if let Some(nullable) = column.nullable {
            descriptor.nullable = nullable;
        }
        out.push(descriptor);
    }

    Ok(out)
}

/// Synthesize columns from a table-matrix header row.
///
/// All columns are stored as text; no type inference is attempted.
pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Result<Vec<ColumnDescriptor>> {
    if headers.is_empty() {
        return Err(Error::InvalidMetadata("header row is empty".into()));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(headers.len());
    for (index, header) in headers.iter().enumerate() {
        let (name, marked) = strip_pk_marker(header.as_ref());
        check_name(name, index, &mut seen)?;

        let descriptor = ColumnDescriptor::new(name, "string");
        out.push(if marked {
            descriptor.primary_key()
        } else {
            descriptor
        });
    }

    Ok(out)
}

fn check_name(name: &str, index: usize, seen: &mut HashSet<String>) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidMetadata(format!(
            "column {} has an empty name",
            index
        )));
    }
    // SQLite identifiers are case-insensitive
    if !seen.insert(name.to_ascii_lowercase()) {
        return Err(Error::InvalidMetadata(format!(
            "duplicate column name '{}'",
            name
        )));
    }
    Ok(())
}
