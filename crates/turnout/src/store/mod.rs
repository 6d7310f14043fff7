//! Persistence for registered users and the attendance log.
//!
//! Two interchangeable backends implement [`Storage`]: an embedded SQLite
//! file and a PostgreSQL server. The backend is picked by configuration.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::{Config, StoreBackend};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use turnout_core::{AttendanceEvent, UserRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("user {0:?} is already registered")]
    DuplicateUser(String),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Operations shared by every persistence backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Register a user. Fails with [`StoreError::DuplicateUser`] if the identity exists.
    async fn add_user(&self, identity: &str, photo: &[u8]) -> Result<(), StoreError>;

    /// Delete a user by identity. Returns whether a row was removed.
    async fn remove_user(&self, identity: &str) -> Result<bool, StoreError>;

    /// All users in registration order.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;

    /// Append one attendance row and return its id.
    async fn append_attendance(
        &self,
        identity: &str,
        date: &str,
        time: &str,
    ) -> Result<i64, StoreError>;

    /// Full attendance log, ordered by id ascending.
    async fn list_attendance(&self) -> Result<Vec<AttendanceEvent>, StoreError>;

    /// Delete every attendance row. Returns the number removed.
    async fn clear_attendance(&self) -> Result<u64, StoreError>;

    /// Rewrite attendance ids to 1..N in their current order; the next
    /// append gets N+1. Returns N.
    async fn renumber_attendance(&self) -> Result<u64, StoreError>;
}

/// Open the backend selected by `config`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Storage>, StoreError> {
    match config.store {
        StoreBackend::Sqlite => {
            let store = SqliteStore::open(&config.db_path).await?;
            tracing::debug!(path = %config.db_path.display(), "sqlite store opened");
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().unwrap_or_default();
            let store = PostgresStore::connect(url).await?;
            tracing::debug!("postgres store connected");
            Ok(Arc::new(store))
        }
    }
}
