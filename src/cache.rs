//! Durable file-backed storage for the token record.
//!
//! One record, one subject, one well-known path. Absence of the file means
//! "unauthenticated"; malformed content means "re-authenticate" and is never
//! surfaced as an error. Writes go through a temp file in the same directory
//! followed by a rename, so a concurrent reader can observe the old record
//! or the new one but never a truncated one.
//!
//! Token values are never logged.

use crate::error::{AuthError, Result};
use crate::tokens::TokenRecord;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// File-backed cache for the current [`TokenRecord`].
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached record, or `None` when nothing usable is stored.
    ///
    /// A missing file, an unreadable file, and malformed content all yield
    /// `None`: every one of them means the subject must (re-)authenticate,
    /// and none of them is an error the caller could act on.
    pub async fn load(&self) -> Option<TokenRecord> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no readable token cache");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "token cache is malformed; treating as unauthenticated"
                );
                None
            }
        }
    }

    /// Persist `record`, stamping `issued_at` from the local clock.
    ///
    /// The stamp always reflects the moment the record was accepted into the
    /// cache, regardless of what the caller put in the field; freshness math
    /// depends on the local clock, not on anything the provider reports.
    /// Creates the parent directory on first use and overwrites atomically.
    pub async fn save(&self, mut record: TokenRecord) -> Result<TokenRecord> {
        record.issued_at = chrono::Utc::now().timestamp();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::CacheWrite(format!("{}: {e}", parent.display())))?;
        }

        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| AuthError::CacheWrite(format!("failed to serialize record: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .await
            .map_err(|e| AuthError::CacheWrite(format!("{}: {e}", tmp_path.display())))?;

        // Owner-only: the file holds bearer credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| AuthError::CacheWrite(format!("{}: {e}", tmp_path.display())))?;
        }

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| AuthError::CacheWrite(format!("{}: {e}", self.path.display())))?;

        info!(
            path = %self.path.display(),
            has_refresh_token = record.refresh_token.is_some(),
            expires_in = record.expires_in,
            "token record saved"
        );

        Ok(record)
    }

    /// Remove the cached record. Idempotent; missing files are fine.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "token cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::CacheWrite(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}
