//! Local store handle.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Lifecycle of the store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Ready,
    Closed,
}

/// The single shared handle to the local SQLite database.
///
/// The pool holds exactly one connection, so every statement issued through
/// the handle is serialized. Cloning shares the handle.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open the database at `database_url` and run migrations.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // One connection: serialized writes, and an in-memory database
        // lives exactly as long as the handle.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open a fresh in-memory database.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        Self::open("sqlite::memory:").await
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn state(&self) -> StoreState {
        if self.pool.is_closed() {
            StoreState::Closed
        } else {
            StoreState::Ready
        }
    }

    /// Close the handle. Pending statements finish first.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Local store closed");
    }
}
