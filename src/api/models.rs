//! Wire types for the asset-tracking API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// A record exactly as the API returned it. Field names vary in case between
/// endpoints, so they are only canonicalized during normalization.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// One page of `GET {history}{id}/observations?page=N`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPage {
    pub data: Vec<RawRecord>,
    pub total_entity_count: u32,
    pub page_length: u32,
}

/// Body of the full asset listing.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetListing {
    pub data: Vec<RawRecord>,
}

/// Identity endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Parse an API timestamp such as `2024-03-01T14:22:05.123+00:00`,
/// `2024-03-01T14:22:05Z` or `2024-03-01T14:22:05.123456+0000`.
pub fn parse_api_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.to_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.to_utc());
        }
    }
    // Offset-less values are treated as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Case-insensitive field lookup on a raw record.
pub fn raw_field<'a>(record: &'a RawRecord, name: &str) -> Option<&'a serde_json::Value> {
    record.get(name).or_else(|| {
        record
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}
