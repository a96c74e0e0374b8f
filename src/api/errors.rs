//! Error types for the asset API client.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Server errors and connection failures that survived every retry.
    #[error("transient failure from {url} (status {status:?}) after retries were exhausted")]
    Transient {
        status: Option<StatusCode>,
        url: String,
    },
    /// The API rejected the bearer token even after a forced refresh.
    #[error("authorization expired for {url} after a forced token refresh")]
    AuthExpired { url: String },
    #[error("failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    RequestFailed(#[from] anyhow::Error),
}

impl ApiError {
    /// Whether this error came from exhausting transient retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired { .. })
    }
}
