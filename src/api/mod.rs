//! Client for the asset-tracking API.

pub mod errors;
pub mod history;
pub mod json;
pub mod middleware;
pub mod models;

pub use errors::ApiError;

use crate::auth::TokenRefresher;
use crate::secrets::{API_SECRET, SecretStore, secret_str};
use anyhow::Context;
use json::parse_json_with_context;
use middleware::{RetryPolicy, TransientRetryMiddleware};
use models::{AssetListing, ObservationPage, RawRecord};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// A pooled HTTP session with transient-retry middleware.
///
/// Cheap to clone, but fetch workers each build their own so connection pools
/// are not shared across workers.
pub type Session = ClientWithMiddleware;

/// Endpoints resolved from the API secret.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    /// Full asset listing.
    pub assets_url: Url,
    /// Base for `{base}{id}/observations`; always ends with `/`.
    pub history_base_url: Url,
}

impl ApiEndpoints {
    pub fn new(assets_url: &str, history_base_url: &str) -> anyhow::Result<Self> {
        let assets_url = Url::parse(assets_url).context("invalid asset listing URL")?;
        let mut history_base_url =
            Url::parse(history_base_url).context("invalid asset history URL")?;
        if !history_base_url.path().ends_with('/') {
            let path = format!("{}/", history_base_url.path());
            history_base_url.set_path(&path);
        }
        Ok(Self {
            assets_url,
            history_base_url,
        })
    }

    pub async fn from_secrets(secrets: &dyn SecretStore) -> anyhow::Result<Self> {
        let secret = secrets
            .get(API_SECRET)
            .await
            .context("failed to load API secret")?;
        Self::new(
            &secret_str(&secret, "API_URL")?,
            &secret_str(&secret, "asset_history_api_url")?,
        )
    }

    pub fn observations_url(&self, id: &str) -> Result<Url, ApiError> {
        self.history_base_url
            .join(&format!("{id}/observations"))
            .with_context(|| format!("cannot build observations URL for id '{id}'"))
            .map_err(ApiError::RequestFailed)
    }
}

/// Session settings shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Disabled only when running locally against intercepting proxies.
    pub verify_tls: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct AssetApi {
    endpoints: ApiEndpoints,
    options: SessionOptions,
    refresher: Arc<TokenRefresher>,
    default_session: Session,
}

impl AssetApi {
    pub fn new(
        endpoints: ApiEndpoints,
        options: SessionOptions,
        refresher: Arc<TokenRefresher>,
    ) -> anyhow::Result<Self> {
        if !options.verify_tls {
            warn!("TLS certificate verification is disabled");
        }
        let default_session = build_session(&options)?;
        Ok(Self {
            endpoints,
            options,
            refresher,
            default_session,
        })
    }

    /// Build a fresh session with its own connection pool.
    pub fn session(&self) -> anyhow::Result<Session> {
        build_session(&self.options)
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.refresher
    }

    /// Fetch the full asset listing.
    pub async fn get_assets(&self) -> Result<Vec<RawRecord>, ApiError> {
        let url = self.endpoints.assets_url.clone();
        let (status, body) = self
            .authorized_get(&self.default_session, url.clone(), &[])
            .await?;
        let listing: AssetListing =
            parse_json_with_context(&body).map_err(|source| ApiError::ParseFailed {
                status,
                url: url.to_string(),
                source,
            })?;
        info!(
            count = %crate::utils::fmt_count(listing.data.len()),
            "Asset listing fetched"
        );
        Ok(listing.data)
    }

    /// Fetch one page of an asset's observation history.
    pub async fn get_observations(
        &self,
        session: &Session,
        id: &str,
        page: u32,
    ) -> Result<ObservationPage, ApiError> {
        let url = self.endpoints.observations_url(id)?;
        let page_param = page.to_string();
        let (status, body) = self
            .authorized_get(session, url.clone(), &[("page", page_param.as_str())])
            .await?;
        parse_json_with_context(&body).map_err(|source| ApiError::ParseFailed {
            status,
            url: url.to_string(),
            source,
        })
    }

    /// GET with the current bearer token.
    ///
    /// A 401 forces exactly one token refresh and one retry of the same
    /// request; a second 401 is [`ApiError::AuthExpired`]. Server errors have
    /// already been retried by the session middleware by the time they get here.
    async fn authorized_get(
        &self,
        session: &Session,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<(u16, String), ApiError> {
        let mut credential = self.refresher.get_token().await?;
        let mut refreshed = false;

        loop {
            let response = match session
                .get(url.clone())
                .bearer_auth(&credential.token)
                .query(query)
                .send()
                .await
            {
                Ok(response) => response,
                Err(reqwest_middleware::Error::Reqwest(e)) if e.is_timeout() || e.is_connect() => {
                    return Err(ApiError::Transient {
                        status: None,
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    return Err(ApiError::RequestFailed(
                        anyhow::Error::new(e).context(format!("GET {url} failed")),
                    ));
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(ApiError::AuthExpired {
                        url: url.to_string(),
                    });
                }
                warn!(
                    url = %url,
                    generation = credential.generation,
                    "Token rejected, forcing refresh"
                );
                credential = self.refresher.on_auth_failure(credential.generation).await?;
                refreshed = true;
                continue;
            }
            if status.is_server_error() {
                return Err(ApiError::Transient {
                    status: Some(status),
                    url: url.to_string(),
                });
            }

            let body = response
                .text()
                .await
                .with_context(|| format!("failed to read body from {url}"))?;
            if !status.is_success() {
                return Err(ApiError::RequestFailed(anyhow::anyhow!(
                    "GET {url} returned {status}"
                )));
            }
            debug!(url = %url, status = status.as_u16(), bytes = body.len(), "API response");
            return Ok((status.as_u16(), body));
        }
    }
}

pub(crate) fn build_session(options: &SessionOptions) -> anyhow::Result<Session> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!options.verify_tls)
        .timeout(options.timeout)
        .build()
        .context("failed to build HTTP client")?;
    Ok(ClientBuilder::new(client)
        .with(TransientRetryMiddleware::new(options.retry))
        .build())
}
