//! On-disk record of the last token issuance.
//!
//! Lets a fresh process decide whether the stored token is close to expiry
//! without spending a request on it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStamp {
    pub timestamp: DateTime<Utc>,
    pub expires_in_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_key_ends_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_key_ends_with: Option<String>,
}

impl TokenStamp {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expires_in_seconds)
    }

    /// Read the stamp. A missing file is `Ok(None)`; an unreadable one is an error.
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let body = match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let stamp = crate::api::json::parse_json_with_context(&body)
            .with_context(|| format!("malformed token stamp {}", path.display()))?;
        Ok(Some(stamp))
    }

    /// Write the stamp via a temporary file so readers never see half a record.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut body = serde_json::to_vec(self)?;
        body.push(b'\n');
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
