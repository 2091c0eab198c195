//! Directory-capability persistence and permission re-verification.
//!
//! One capability per device: the record lives under a fixed key, is written
//! only by explicit user action, and is treated as absent whenever
//! re-verification fails.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result, StoreError};

use super::Store;

/// Fixed key the single capability record lives under
const CAPABILITY_KEY: &str = "directory_capability";

/// Outcome of a permission check on a stored capability
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    /// The directory is present and writable
    Granted,
    /// The directory is missing, not writable, or the check itself failed
    Denied,
}

/// A persisted, revocable grant of write access to one local directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCapability {
    /// The granted directory
    pub path: PathBuf,
    /// Cached human-readable name shown in UIs
    pub display_name: String,
}

impl DirectoryCapability {
    /// Create a capability for a directory the user just chose
    ///
    /// The display name is cached from the final path component at grant
    /// time, mirroring how a picker would label the choice.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, display_name }
    }

    /// Re-verify write permission on this capability
    ///
    /// Queries current state first (directory exists and a probe file can be
    /// created); if the directory is gone, requests access exactly once by
    /// trying to recreate it. Any platform error along the way is `Denied`,
    /// never propagated — permission failures are expected, not exceptional.
    pub async fn verify(&self) -> Permission {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            // The one permission "request" per verification call
            if tokio::fs::create_dir_all(&self.path).await.is_err() {
                tracing::debug!(path = %self.path.display(), "Capability directory cannot be created");
                return Permission::Denied;
            }
        }

        // Writability probe: create and remove a marker file
        let probe = self.path.join(format!(".media-dl-probe-{}", std::process::id()));
        match tokio::fs::write(&probe, b"").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
                Permission::Granted
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Capability probe write failed");
                Permission::Denied
            }
        }
    }
}

impl Store {
    /// Persist the capability record, replacing any previous one
    pub async fn save_capability(&self, capability: &DirectoryCapability) -> Result<()> {
        let value = serde_json::to_string(capability)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO capability_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(CAPABILITY_KEY)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "failed to save capability: {e}"
            )))
        })?;

        tracing::info!(path = %capability.path.display(), "Directory capability saved");
        Ok(())
    }

    /// Load the capability record, if one is stored
    pub async fn load_capability(&self) -> Result<Option<DirectoryCapability>> {
        let value: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value FROM capability_store WHERE key = ?
            "#,
        )
        .bind(CAPABILITY_KEY)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "failed to load capability: {e}"
            )))
        })?;

        match value {
            None => Ok(None),
            Some(value) => {
                let capability = serde_json::from_str(&value).map_err(|e| {
                    Error::Store(StoreError::CorruptRecord {
                        key: CAPABILITY_KEY.to_string(),
                        reason: e.to_string(),
                    })
                })?;
                Ok(Some(capability))
            }
        }
    }

    /// Remove the capability record; explicit user action only
    pub async fn clear_capability(&self) -> Result<()> {
        sqlx::query("DELETE FROM capability_store WHERE key = ?")
            .bind(CAPABILITY_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "failed to clear capability: {e}"
                )))
            })?;

        tracing::info!("Directory capability cleared");
        Ok(())
    }
}
