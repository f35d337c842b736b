//! Endpoint catalog.
//!
//! The catalog is an immutable list of [`ApiDescriptor`]s, each tagged with
//! the [`Phase`] it runs in, indexed by key once at construction. A sync run
//! selects descriptors by intersecting the catalog with the caller's enabled
//! keys.

use crate::{error::Result, ApiKey, Error, TableName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last-sync token sent for endpoints that have never been synced.
pub const INITIAL_SYNC_TOKEN: &str = "1970-01-01 00:00:00";

/// Execution phase. Phases run strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Master,
    Config,
    Transactional,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 3] = [Phase::Master, Phase::Config, Phase::Transactional];

    /// The phase that runs after this one.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Master => Some(Phase::Config),
            Phase::Config => Some(Phase::Transactional),
            Phase::Transactional => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Master => write!(f, "MASTER"),
            Phase::Config => write!(f, "CONFIG"),
            Phase::Transactional => write!(f, "TRANSACTIONAL"),
        }
    }
}

/// Wire shape of an endpoint's data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseShape {
    /// Metadata document + array-of-objects data document
    JsonWithMetadata,
    /// Header row + value rows
    TableMatrix,
}

/// Static definition of one remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    pub key: ApiKey,
    pub display_name: String,
    /// Path of the data endpoint, relative to the API base URL
    pub url_template: String,
    /// Path of the metadata endpoint (JSON responses only)
    pub metadata_url: Option<String>,
    /// Local table the rows are written to
    pub table_name: TableName,
    pub phase: Phase,
    pub requires_org_id: bool,
    pub requires_default_org_id: bool,
    pub response_shape: ResponseShape,
    pub needs_last_sync_token: bool,
    pub needs_full_refresh_flag: bool,
    /// Point-in-time table, fully replaced on every refresh
    pub snapshot: bool,
    /// Extra idempotent DDL run after the table is ensured
    pub auxiliary_ddl: Vec<String>,
}

impl ApiDescriptor {
    /// Create a descriptor. The table name defaults to the lowercased key.
    pub fn new(
        key: impl Into<ApiKey>,
        display_name: impl Into<String>,
        phase: Phase,
        response_shape: ResponseShape,
        url_template: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            table_name: key.to_ascii_lowercase(),
            key,
            display_name: display_name.into(),
            url_template: url_template.into(),
            metadata_url: None,
            phase,
            requires_org_id: false,
            requires_default_org_id: false,
            response_shape,
            needs_last_sync_token: false,
            needs_full_refresh_flag: false,
            snapshot: false,
            auxiliary_ddl: Vec::new(),
        }
    }

    pub fn table(mut self, name: impl Into<TableName>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn metadata(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = Some(url.into());
        self
    }

    pub fn org(mut self) -> Self {
        self.requires_org_id = true;
        self
    }

    pub fn default_org(mut self) -> Self {
        self.requires_default_org_id = true;
        self
    }

    pub fn last_sync(mut self) -> Self {
        self.needs_last_sync_token = true;
        self
    }

    pub fn full_refresh(mut self) -> Self {
        self.needs_full_refresh_flag = true;
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }

    pub fn ddl(mut self, statement: impl Into<String>) -> Self {
        self.auxiliary_ddl.push(statement.into());
        self
    }

    /// Path segments appended to the URL template, in fixed order:
    /// default org, org, last-sync token, full-refresh flag.
    pub fn url_segments(&self, ctx: &UrlContext) -> Result<Vec<String>> {
        let mut segments = Vec::new();

        if self.requires_default_org_id {
            segments.push(required(&ctx.default_org_id).ok_or_else(|| {
                Error::MissingIdentifier {
                    key: self.key.clone(),
                    identifier: "a default organization id",
                }
            })?);
        }
        if self.requires_org_id {
            segments.push(required(&ctx.org_id).ok_or_else(|| Error::MissingIdentifier {
                key: self.key.clone(),
                identifier: "an organization id",
            })?);
        }
        if self.needs_last_sync_token {
            segments.push(
                required(&ctx.last_sync_token).unwrap_or_else(|| INITIAL_SYNC_TOKEN.to_string()),
            );
        }
        if self.needs_full_refresh_flag {
            segments.push(if ctx.full_refresh { "Y" } else { "N" }.to_string());
        }

        Ok(segments)
    }

    /// Data path with segments joined by `/`. Segments are not encoded.
    pub fn request_path(&self, ctx: &UrlContext) -> Result<String> {
        let mut path = self.url_template.trim_end_matches('/').to_string();
        for segment in self.url_segments(ctx)? {
            path.push('/');
            path.push_str(&segment);
        }
        Ok(path)
    }
}

fn required(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Identifiers available when building request URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlContext {
    pub org_id: Option<String>,
    pub default_org_id: Option<String>,
    pub last_sync_token: Option<String>,
    pub full_refresh: bool,
}

/// Immutable registry of endpoint descriptors.
#[derive(Debug, Clone)]
pub struct ApiCatalog {
    descriptors: Vec<ApiDescriptor>,
    by_key: HashMap<ApiKey, usize>,
}

impl ApiCatalog {
    /// Build a catalog. Keys must be unique.
    pub fn new(descriptors: Vec<ApiDescriptor>) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if by_key.insert(descriptor.key.clone(), index).is_some() {
                return Err(Error::DuplicateEndpoint {
                    key: descriptor.key.clone(),
                    phase: descriptor.phase,
                });
            }
        }
        Ok(Self {
            descriptors,
            by_key,
        })
    }

    /// Get a descriptor by key.
    pub fn get(&self, key: &str) -> Option<&ApiDescriptor> {
        self.by_key.get(key).map(|&i| &self.descriptors[i])
    }

    /// All descriptors in registry order.
    pub fn descriptors(&self) -> &[ApiDescriptor] {
        &self.descriptors
    }

    /// Descriptors of one phase in registry order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &ApiDescriptor> {
        self.descriptors.iter().filter(move |d| d.phase == phase)
    }

    /// Select the enabled descriptors, ordered by phase then registry order.
    pub fn resolve<S: AsRef<str>>(&self, enabled: &[S]) -> Vec<&ApiDescriptor> {
        Phase::ALL
            .iter()
            .flat_map(|&phase| self.phase(phase))
            .filter(|d| enabled.iter().any(|k| k.as_ref() == d.key))
            .collect()
    }

    /// Enabled keys the catalog does not know.
    pub fn unknown_keys<S: AsRef<str>>(&self, enabled: &[S]) -> Vec<Error> {
        enabled
            .iter()
            .filter(|k| !self.by_key.contains_key(k.as_ref()))
            .map(|k| Error::UnknownEndpoint(k.as_ref().to_string()))
            .collect()
    }

    /// Names of tables that are fully replaced on refresh.
    pub fn snapshot_tables(&self) -> Vec<TableName> {
        self.descriptors
            .iter()
            .filter(|d| d.snapshot)
            .map(|d| d.table_name.clone())
            .collect()
    }

    /// The warehouse endpoint catalog shipped with the client.
    pub fn with_defaults() -> Self {
        use Phase::*;
        use ResponseShape::*;

        let descriptors = vec![
            // Master data
            ApiDescriptor::new(
                "GET_ORGANIZATIONS",
                "Organizations",
                Master,
                JsonWithMetadata,
                "/organizations",
            )
            .metadata("/organizations/metadata")
            .table("organizations")
            .snapshot(),
            ApiDescriptor::new("GET_ITEMS", "Items", Master, TableMatrix, "/items")
                .table("items")
                .org()
                .last_sync()
                .full_refresh(),
            ApiDescriptor::new(
                "GET_SUBINVENTORIES",
                "Subinventories",
                Master,
                TableMatrix,
                "/subinventories",
            )
            .table("subinventories")
            .org(),
            ApiDescriptor::new("GET_LOCATORS", "Locators", Master, TableMatrix, "/locators")
                .table("locators")
                .org()
                .last_sync()
                .full_refresh(),
            ApiDescriptor::new(
                "GET_UOM",
                "Units of Measure",
                Master,
                JsonWithMetadata,
                "/uom",
            )
            .metadata("/uom/metadata")
            .table("units_of_measure"),
            // Configuration
            ApiDescriptor::new(
                "GET_LOGIN_PROFILE",
                "Login Profile",
                Config,
                JsonWithMetadata,
                "/profile",
            )
            .metadata("/profile/metadata")
            .table("login_profile")
            .default_org()
            .snapshot(),
            ApiDescriptor::new(
                "GET_RESPONSIBILITIES",
                "Responsibilities",
                Config,
                JsonWithMetadata,
                "/responsibilities",
            )
            .metadata("/responsibilities/metadata")
            .table("responsibilities")
            .default_org(),
            ApiDescriptor::new(
                "GET_REASON_CODES",
                "Reason Codes",
                Config,
                TableMatrix,
                "/reasons",
            )
            .table("reason_codes")
            .org(),
            // Transactions
            ApiDescriptor::new("GET_ONHAND", "On-hand Quantities", Transactional, TableMatrix, "/onhand")
                .table("onhand")
                .org()
                .last_sync()
                .full_refresh(),
            ApiDescriptor::new(
                "GET_PO_RECEIPTS",
                "Purchase Order Receipts",
                Transactional,
                TableMatrix,
                "/receipts",
            )
            .table("po_receipts")
            .default_org()
            .org()
            .last_sync(),
            ApiDescriptor::new(
                "GET_MOVE_ORDERS",
                "Move Orders",
                Transactional,
                TableMatrix,
                "/move-orders",
            )
            .table("move_orders")
            .org()
            .last_sync()
            .full_refresh(),
            ApiDescriptor::new(
                "GET_SHIPMENTS",
                "Shipments",
                Transactional,
                TableMatrix,
                "/shipments",
            )
            .table("shipments")
            .org()
            .last_sync()
            .ddl(
                "CREATE TABLE IF NOT EXISTS \"shipment_scans\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"SHIPMENT_ID\" TEXT NOT NULL, \"BARCODE\" TEXT NOT NULL, \"SCANNED_AT\" TEXT)",
            ),
        ];

        // Keys above are unique; construction cannot fail.
        let by_key = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.key.clone(), i))
            .collect();
        Self {
            descriptors,
            by_key,
        }
    }
}
