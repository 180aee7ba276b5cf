use serde::{Serialize, de::DeserializeOwned};

use crate::{domain::error::DomainError, storage::SqliteStore};

impl SqliteStore {
    /// Loads a whole document, falling back to its default when it was
    /// never written.
    pub async fn load_document<T>(&self, key: &str) -> Result<T, DomainError>
    where
        T: DeserializeOwned + Default,
    {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value_json FROM documents WHERE key = ? LIMIT 1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to read document {key}: {error}")))?;

        let Some((value_json,)) = row else {
            return Ok(T::default());
        };

        serde_json::from_str::<T>(&value_json)
            .map_err(|error| DomainError::Storage(format!("invalid document {key}: {error}")))
    }

    /// Replaces a whole document.
    pub async fn save_document<T>(&self, key: &str, value: &T) -> Result<(), DomainError>
    where
        T: Serialize,
    {
        let json_text = serde_json::to_string(value).map_err(|error| {
            DomainError::Storage(format!("failed to serialize document {key}: {error}"))
        })?;
        let now = super::util::now_unix_ms();

        sqlx::query(
            "INSERT INTO documents(key, value_json, updated_at_ms) VALUES(?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(key)
        .bind(json_text)
        .bind(i64::try_from(now).unwrap_or(i64::MAX))
        .execute(self.pool())
        .await
        .map_err(|error| {
            DomainError::Storage(format!("failed to persist document {key}: {error}"))
        })?;

        Ok(())
    }
}
