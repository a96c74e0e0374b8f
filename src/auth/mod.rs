//! Shared bearer credential with proactive and forced refresh.
//!
//! One [`TokenRefresher`] is shared by every fetch task. Readers clone the
//! current [`Credential`] out of an `RwLock`; refreshes are serialized by a
//! separate gate so the old token stays readable (and usable by in-flight
//! requests) until the new one is published.

pub mod stamp;

use crate::api::ApiError;
use crate::api::json::parse_json_with_context;
use crate::api::models::TokenResponse;
use crate::secrets::{API_SECRET, Secret, SecretStore, TOKEN_REFRESH_SECRET, secret_str};
use crate::utils::{fmt_duration, mask_secret};
use anyhow::Context;
use chrono::{DateTime, Utc};
use stamp::TokenStamp;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Refresh once fewer than 1/15 of the lifetime remains.
const REFRESH_NUMERATOR: u32 = 14;
const REFRESH_DENOMINATOR: u32 = 15;

#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Bumped on every refresh. Lets a caller that saw a 401 with generation
    /// `n` detect that someone else already replaced the token.
    pub generation: u64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &mask_secret(&self.token))
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Credential {
    /// Whether the credential has used up 14/15 of its lifetime at `now`.
    ///
    /// A lifetime too large to represent never comes due.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.ttl
            .checked_mul(REFRESH_NUMERATOR)
            .map(|scaled| scaled / REFRESH_DENOMINATOR)
            .and_then(|usable| chrono::TimeDelta::from_std(usable).ok())
            .and_then(|usable| self.issued_at.checked_add_signed(usable))
            .is_some_and(|due_at| due_at < now)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Client for the identity endpoint.
///
/// The token-reset secret holds the endpoint `url`; every other key in it is
/// posted as a form field.
pub struct TokenEndpoint {
    http: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl TokenEndpoint {
    pub fn new(http: reqwest::Client, secrets: Arc<dyn SecretStore>) -> Self {
        Self { http, secrets }
    }

    pub async fn request_token(&self) -> Result<TokenResponse, ApiError> {
        let mut secret = self
            .secrets
            .get(TOKEN_REFRESH_SECRET)
            .await
            .context("failed to load token reset request")?;
        let url = secret_str(&secret, "url")?;
        secret.remove("url");
        let form: Vec<(String, String)> = secret
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("token request failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read token response")?;
        if !status.is_success() {
            return Err(ApiError::RequestFailed(anyhow::anyhow!(
                "identity endpoint returned {status}"
            )));
        }

        let token: TokenResponse =
            parse_json_with_context(&body).map_err(|source| ApiError::ParseFailed {
                status: status.as_u16(),
                url: url.clone(),
                source,
            })?;
        info!(
            expires_in = %crate::utils::fmt_count(token.expires_in as usize),
            "New token acquired"
        );
        Ok(token)
    }
}

#[derive(Debug, Clone, Copy)]
enum RefreshReason {
    Expiring,
    Rejected,
}

pub struct TokenRefresher {
    current: RwLock<Credential>,
    gate: Mutex<()>,
    endpoint: TokenEndpoint,
    secrets: Arc<dyn SecretStore>,
    stamp_path: PathBuf,
    settle_delay: Duration,
}

impl TokenRefresher {
    /// Build the refresher from the stored token and the on-disk stamp.
    ///
    /// A missing or unreadable stamp leaves the credential due for refresh, so
    /// the first [`get_token`](Self::get_token) fetches a new one.
    pub async fn load(
        endpoint: TokenEndpoint,
        secrets: Arc<dyn SecretStore>,
        stamp_path: PathBuf,
        settle_delay: Duration,
    ) -> anyhow::Result<Self> {
        let secret = secrets
            .get(API_SECRET)
            .await
            .context("failed to load API secret")?;
        let token = secret_str(&secret, "API_KEY")?;

        let stamp = match TokenStamp::read(&stamp_path).await {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!(error = ?e, "Ignoring unreadable token stamp");
                None
            }
        };
        let (issued_at, ttl) = match stamp {
            Some(stamp) => (stamp.timestamp, stamp.ttl()),
            None => (DateTime::<Utc>::UNIX_EPOCH, Duration::ZERO),
        };

        let credential = Credential {
            token,
            issued_at,
            ttl,
            generation: 0,
        };
        if credential.refresh_due(Utc::now()) {
            info!("Stored token is due for refresh");
        } else {
            info!(valid_until = %credential.expires_at(), "Current token valid");
        }

        Ok(Self::new(
            credential,
            endpoint,
            secrets,
            stamp_path,
            settle_delay,
        ))
    }

    pub fn new(
        credential: Credential,
        endpoint: TokenEndpoint,
        secrets: Arc<dyn SecretStore>,
        stamp_path: PathBuf,
        settle_delay: Duration,
    ) -> Self {
        Self {
            current: RwLock::new(credential),
            gate: Mutex::new(()),
            endpoint,
            secrets,
            stamp_path,
            settle_delay,
        }
    }

    /// Current credential, refreshed first if it is close to expiry.
    ///
    /// Concurrent callers that all find the token due produce a single refresh;
    /// the rest wait on the gate and pick up the published result.
    pub async fn get_token(&self) -> Result<Credential, ApiError> {
        {
            let current = self.current.read().await;
            if !current.refresh_due(Utc::now()) {
                return Ok(current.clone());
            }
        }

        let _gate = self.gate.lock().await;
        let current = self.current.read().await.clone();
        if !current.refresh_due(Utc::now()) {
            return Ok(current);
        }
        self.refresh(RefreshReason::Expiring).await
    }

    /// Force a refresh after the API rejected the credential of `seen_generation`.
    ///
    /// If another task already refreshed past that generation, its token is
    /// returned without a second network call.
    pub async fn on_auth_failure(&self, seen_generation: u64) -> Result<Credential, ApiError> {
        let _gate = self.gate.lock().await;
        let current = self.current.read().await.clone();
        if current.generation > seen_generation {
            debug!(
                generation = current.generation,
                "Token already refreshed by another task"
            );
            return Ok(current);
        }
        self.refresh(RefreshReason::Rejected).await
    }

    /// Must be called with the gate held.
    async fn refresh(&self, reason: RefreshReason) -> Result<Credential, ApiError> {
        info!(reason = ?reason, "Refreshing API token");
        let response = self.endpoint.request_token().await?;
        let issued_at = Utc::now();

        // The provider takes a moment to activate a new token; requests made
        // immediately after issuance are rejected with 401.
        if !self.settle_delay.is_zero() {
            debug!(
                delay = fmt_duration(self.settle_delay),
                "Waiting for token activation"
            );
            tokio::time::sleep(self.settle_delay).await;
        }

        let (next, old_suffix) = {
            let mut current = self.current.write().await;
            let old_suffix = mask_secret(&current.token);
            *current = Credential {
                token: response.access_token,
                issued_at,
                ttl: Duration::from_secs(response.expires_in),
                generation: current.generation + 1,
            };
            (current.clone(), old_suffix)
        };

        let stamp = TokenStamp {
            timestamp: issued_at,
            expires_in_seconds: response.expires_in,
            old_key_ends_with: Some(old_suffix),
            new_key_ends_with: Some(mask_secret(&next.token)),
        };
        info!(
            old_key = stamp.old_key_ends_with.as_deref(),
            new_key = stamp.new_key_ends_with.as_deref(),
            generation = next.generation,
            valid_until = %next.expires_at(),
            "API token replaced"
        );
        self.persist(&next, &stamp).await;

        Ok(next)
    }

    /// Persistence failures are logged only: the in-memory token is already valid.
    async fn persist(&self, credential: &Credential, stamp: &TokenStamp) {
        let mut partial = Secret::new();
        partial.insert(
            "API_KEY".to_owned(),
            serde_json::Value::String(credential.token.clone()),
        );
        if let Err(e) = self.secrets.update(API_SECRET, partial).await {
            warn!(error = ?e, "Failed to persist refreshed token to secret store");
        }
        if let Err(e) = stamp.write(&self.stamp_path).await {
            warn!(error = ?e, path = %self.stamp_path.display(), "Failed to write token stamp");
        }
    }

    /// Generation of the credential currently published.
    #[cfg(test)]
    pub(crate) async fn generation(&self) -> u64 {
        self.current.read().await.generation
    }
}
