//! Secret store access.
//!
//! Bearer tokens, the token-reset request, and downstream credentials live in
//! an external secret store. The pipeline only needs `get` and a partial
//! `update`, so that is all the trait exposes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Holds `API_KEY`, `API_URL` (asset listing) and `asset_history_api_url`.
pub const API_SECRET: &str = "CCO/asset_management_API";
/// Holds `url` plus the form fields posted to the identity endpoint.
pub const TOKEN_REFRESH_SECRET: &str = "CCO/asset_management_API/token_reset_request";
/// Holds `url`, `login` and `password` for the downstream orchestrator.
pub const AIRFLOW_SECRET: &str = "airflow-v2/airflow";

pub type Secret = serde_json::Map<String, Value>;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Secret>;

    /// Merge `partial` into the named secret, leaving other keys untouched.
    async fn update(&self, name: &str, partial: Secret) -> Result<()>;
}

/// Read a string field out of a secret.
pub fn secret_str(secret: &Secret, key: &str) -> Result<String> {
    match secret.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => anyhow::bail!("secret is missing key '{key}'"),
    }
}

/// Secret store backed by a single JSON document of `{name: {key: value}}`.
pub struct FileSecretStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Secret>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read secrets file {}", self.path.display()))?;
        crate::api::json::parse_json_with_context(&body)
            .with_context(|| format!("malformed secrets file {}", self.path.display()))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<Secret> {
        let mut all = self.load().await?;
        all.remove(name)
            .with_context(|| format!("secret '{name}' not found"))
    }

    async fn update(&self, name: &str, partial: Secret) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load().await?;
        let keys: Vec<String> = partial.keys().cloned().collect();
        all.entry(name.to_owned()).or_default().extend(partial);

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&all)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("failed to replace secrets file")?;

        debug!(secret = name, keys = ?keys, "Secret updated");
        Ok(())
    }
}
