//! # Stockpile Engine
//!
//! Schema synthesis, response adaptation and sync bookkeeping for the
//! Stockpile warehouse client.
//!
//! This crate holds every decision the sync client makes that does not need
//! IO: how a server response becomes columns and rows, what DDL a table gets,
//! which endpoints a run selects and in what order, and how activities move
//! through their states.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network or the database
//! - **Deterministic**: timestamps and ids are supplied by the caller
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Columns and Tables
//!
//! [`column::from_metadata`] and [`column::from_headers`] synthesize
//! [`ColumnDescriptor`]s; [`TableSchema::derive`] applies the synthetic key
//! rule and renders idempotent DDL.
//!
//! ### Responses
//!
//! [`adapter::adapt`] normalizes both wire shapes ([`ResponseShape`]) into
//! an [`AdaptedResponse`].
//!
//! ### Catalog
//!
//! The [`ApiCatalog`] is an immutable registry of [`ApiDescriptor`]s, each
//! bound to a [`Phase`].
//!
//! ### Activities
//!
//! The [`ActivityBook`] tracks one [`Activity`] per run attempt of an
//! endpoint. [`retry::plan_retry`] applies the bounded retry rules and
//! [`consolidate`] reduces activities to one [`ConsolidatedRecord`] per
//! endpoint.
//!
//! ## Quick Start
//!
//! ```rust
//! use stockpile_engine::{adapter, TableSchema};
//! use serde_json::json;
//!
//! let payload = json!([
//!     ["ITEM_ID_PK", "ITEM_DESC"],
//!     ["100", "Widget"],
//!     ["101", "Gadget"],
//! ]);
//!
//! let adapted = adapter::adapt_table(Some(&payload)).unwrap();
//! assert_eq!(adapted.rows.len(), 2);
//!
//! let schema = TableSchema::derive("items", adapted.columns);
//! assert!(!schema.has_synthetic_key());
//! assert!(schema.create_sql().starts_with("CREATE TABLE IF NOT EXISTS \"items\""));
//! ```

pub mod activity;
pub mod adapter;
pub mod catalog;
pub mod column;
pub mod consolidate;
pub mod error;
pub mod retry;
pub mod run;
pub mod schema;

// Re-export main types at crate root
pub use activity::{Activity, ActivityBook, ActivityStatus, Outcome};
pub use adapter::{AdaptedResponse, Row};
pub use catalog::{ApiCatalog, ApiDescriptor, Phase, ResponseShape, UrlContext};
pub use column::{ColumnDescriptor, SourceColumn, StorageType};
pub use consolidate::{consolidate, ConsolidatedRecord};
pub use error::Error;
pub use retry::{plan_retry, RetryPlan, RetryPolicy, MAX_RETRY_ATTEMPTS, RETRY_DELAY_MS};
pub use run::RunState;
pub use schema::{SchemaDrift, TableSchema};

/// Type aliases for clarity
pub type ApiKey = String;
pub type ActivityId = String;
pub type TableName = String;
pub type Timestamp = u64;
