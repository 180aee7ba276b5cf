use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use tracing::debug;

use crate::domain::error::DomainError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database holding the controller's persisted documents.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &Path) -> Result<Self, DomainError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                DomainError::Storage(format!("failed to create storage directory: {error}"))
            })?;
        }

        let db_url = format!("sqlite://{}", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|error| DomainError::Storage(format!("invalid sqlite URL: {error}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|error| DomainError::Storage(format!("failed to open database: {error}")))?;

        debug!("opened document database path={}", path.display());
        let store = Self { pool };
        super::migrations::migrate(store.pool()).await?;
        Ok(store)
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
