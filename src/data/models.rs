//! Row types for the `assets` and `asset_history` tables.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of one physical asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AssetRecord {
    pub id: String,
    pub itemname: Option<String>,
    pub description: Option<String>,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub itemclass: Option<String>,
    pub itemtype: Option<String>,
    pub owner: Option<String>,
    pub lastseenlocation: Option<String>,
    pub lastseenperson: Option<String>,
    pub lastseentime: Option<DateTime<Utc>>,
    pub precinct: Option<String>,
    /// Change watermark. Excluded from content comparison.
    pub updated_on: DateTime<Utc>,
}

/// Every column of [`AssetRecord`] except the watermark.
///
/// Two records with equal content are the same row as far as sync is concerned.
#[derive(Debug, PartialEq, Eq)]
pub struct AssetContent<'a> {
    pub id: &'a str,
    pub itemname: Option<&'a str>,
    pub description: Option<&'a str>,
    pub serial: Option<&'a str>,
    pub manufacturer: Option<&'a str>,
    pub model: Option<&'a str>,
    pub itemclass: Option<&'a str>,
    pub itemtype: Option<&'a str>,
    pub owner: Option<&'a str>,
    pub lastseenlocation: Option<&'a str>,
    pub lastseenperson: Option<&'a str>,
    pub lastseentime: Option<DateTime<Utc>>,
    pub precinct: Option<&'a str>,
}

impl AssetRecord {
    /// Columns in table order, matching the field order above.
    pub const COLUMNS: &'static [&'static str] = &[
        "id",
        "itemname",
        "description",
        "serial",
        "manufacturer",
        "model",
        "itemclass",
        "itemtype",
        "owner",
        "lastseenlocation",
        "lastseenperson",
        "lastseentime",
        "precinct",
        "updated_on",
    ];

    /// The watermark column, excluded from [`content`](Self::content).
    pub const WATERMARK: &'static str = "updated_on";

    pub fn content(&self) -> AssetContent<'_> {
        AssetContent {
            id: &self.id,
            itemname: self.itemname.as_deref(),
            description: self.description.as_deref(),
            serial: self.serial.as_deref(),
            manufacturer: self.manufacturer.as_deref(),
            model: self.model.as_deref(),
            itemclass: self.itemclass.as_deref(),
            itemtype: self.itemtype.as_deref(),
            owner: self.owner.as_deref(),
            lastseenlocation: self.lastseenlocation.as_deref(),
            lastseenperson: self.lastseenperson.as_deref(),
            lastseentime: self.lastseentime,
            precinct: self.precinct.as_deref(),
        }
    }
}

/// One observation event in an asset's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: String,
    pub tagepc: Option<String>,
    pub lastseenlocationname: Option<String>,
    pub lastseenpersonfullname: Option<String>,
    pub lastseentime: Option<DateTime<Utc>>,
    pub updated_on: DateTime<Utc>,
}

impl HistoryRecord {
    pub const COLUMNS: &'static [&'static str] = &[
        "id",
        "tagepc",
        "lastseenlocationname",
        "lastseenpersonfullname",
        "lastseentime",
        "updated_on",
    ];
}

/// What a full-snapshot sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// Ids removed because they no longer appear in the snapshot.
    pub deleted: Vec<String>,
    /// Ids inserted or overwritten because their content changed.
    pub upserted: Vec<String>,
    pub unchanged: usize,
}

impl SnapshotOutcome {
    /// Nothing was written, so downstream stages have nothing to publish.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.upserted.is_empty()
    }

    /// Union of deleted and upserted ids, deleted first.
    pub fn touched_ids(&self) -> Vec<String> {
        self.deleted
            .iter()
            .chain(self.upserted.iter())
            .cloned()
            .collect()
    }
}

/// Row counts from a windowed history replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceCounts {
    pub deleted: u64,
    pub inserted: u64,
}
