//! Reshapes raw API records into canonical rows.
//!
//! Field names are matched case-insensitively against a static column table.
//! Fields the table does not name are dropped. A record with a missing `id` or
//! a malformed value is rejected on its own; the rest of the batch continues.

use crate::api::models::{RawRecord, parse_api_timestamp, raw_field};
use crate::data::models::{AssetRecord, HistoryRecord};
use crate::sync::precinct::extract_precinct;
use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Zone processing timestamps and exports are reported in.
pub const REPORTING_TZ: Tz = chrono_tz::US::Eastern;

/// Where a column's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String field from the API. Numbers and booleans are stringified.
    Text,
    /// API timestamp, truncated to microseconds.
    Timestamp,
    /// Computed from other columns.
    Derived,
    /// Processing timestamp; never compared.
    Watermark,
}

impl FieldKind {
    pub fn is_sourced(self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Timestamp)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn col(name: &'static str, kind: FieldKind) -> Column {
    Column { name, kind }
}

pub static ASSET_COLUMNS: &[Column] = &[
    col("id", FieldKind::Text),
    col("itemname", FieldKind::Text),
    col("description", FieldKind::Text),
    col("serial", FieldKind::Text),
    col("manufacturer", FieldKind::Text),
    col("model", FieldKind::Text),
    col("itemclass", FieldKind::Text),
    col("itemtype", FieldKind::Text),
    col("owner", FieldKind::Text),
    col("lastseenlocation", FieldKind::Text),
    col("lastseenperson", FieldKind::Text),
    col("lastseentime", FieldKind::Timestamp),
    col("precinct", FieldKind::Derived),
    col("updated_on", FieldKind::Watermark),
];

pub static HISTORY_COLUMNS: &[Column] = &[
    col("id", FieldKind::Text),
    col("tagepc", FieldKind::Text),
    col("lastseenlocationname", FieldKind::Text),
    col("lastseenpersonfullname", FieldKind::Text),
    col("lastseentime", FieldKind::Timestamp),
    col("updated_on", FieldKind::Watermark),
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("record is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("column mapping for '{table}' is invalid: {reason}")]
    Schema { table: &'static str, reason: String },
}

/// Check both column tables against the row types they fill.
///
/// Run once at startup; a failure here means the binary itself is broken.
pub fn validate_schema() -> Result<(), ValidationError> {
    validate_table("assets", ASSET_COLUMNS, AssetRecord::COLUMNS)?;
    validate_table("asset_history", HISTORY_COLUMNS, HistoryRecord::COLUMNS)
}

fn validate_table(
    table: &'static str,
    columns: &[Column],
    row_columns: &[&str],
) -> Result<(), ValidationError> {
    let schema = |reason: String| ValidationError::Schema { table, reason };

    let mut seen = HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.name)) {
        return Err(schema(format!("duplicate column '{}'", dup.name)));
    }

    match columns.iter().find(|c| c.name == "id") {
        Some(c) if c.kind == FieldKind::Text => {}
        Some(_) => return Err(schema("'id' must be a text column".into())),
        None => return Err(schema("'id' column is missing".into())),
    }

    let watermarks: Vec<_> = columns
        .iter()
        .filter(|c| c.kind == FieldKind::Watermark)
        .map(|c| c.name)
        .collect();
    if watermarks != [AssetRecord::WATERMARK] {
        return Err(schema(format!(
            "expected exactly one watermark '{}', found {watermarks:?}",
            AssetRecord::WATERMARK
        )));
    }

    let names: Vec<_> = columns.iter().map(|c| c.name).collect();
    if names != row_columns {
        return Err(schema(format!(
            "columns {names:?} do not match row columns {row_columns:?}"
        )));
    }
    Ok(())
}

/// Current time as a processing stamp, at the store's microsecond precision.
pub fn processing_timestamp() -> DateTime<Utc> {
    Utc::now()
        .with_timezone(&REPORTING_TZ)
        .trunc_subsecs(6)
        .to_utc()
}

/// A record that could not be normalized.
#[derive(Debug)]
pub struct Rejected {
    /// Position in the input batch.
    pub index: usize,
    pub id: Option<String>,
    pub error: ValidationError,
}

#[derive(Debug)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub rejected: Vec<Rejected>,
    /// Earlier occurrences dropped in favour of a later record with the same id.
    pub duplicates: usize,
}

impl<T> Normalized<T> {
    /// Ids of rejected records that carried one, sorted and deduplicated.
    pub fn rejected_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .rejected
            .iter()
            .filter_map(|r| r.id.as_deref())
            .collect();
        ids.into_iter().map(str::to_owned).collect()
    }
}

/// Values pulled from one raw record, keyed by column name.
struct Fields<'a> {
    values: HashMap<&'static str, &'a Value>,
}

impl<'a> Fields<'a> {
    fn extract(record: &'a RawRecord, columns: &[Column]) -> Self {
        let by_lower: HashMap<String, &Value> = record
            .iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();
        let values = columns
            .iter()
            .filter(|c| c.kind.is_sourced())
            .filter_map(|c| by_lower.get(c.name).map(|v| (c.name, *v)))
            .collect();
        Self { values }
    }

    fn text(&self, field: &'static str) -> Result<Option<String>, ValidationError> {
        match self.values.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(ValidationError::Malformed {
                field,
                reason: format!("expected a scalar, found {}", json_kind(other)),
            }),
        }
    }

    fn timestamp(&self, field: &'static str) -> Result<Option<DateTime<Utc>>, ValidationError> {
        match self.values.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => parse_api_timestamp(s)
                .map(|ts| Some(ts.trunc_subsecs(6)))
                .ok_or_else(|| ValidationError::Malformed {
                    field,
                    reason: format!("unparseable timestamp '{s}'"),
                }),
            Some(other) => Err(ValidationError::Malformed {
                field,
                reason: format!("expected a timestamp string, found {}", json_kind(other)),
            }),
        }
    }

    fn id(&self) -> Result<String, ValidationError> {
        match self.text("id")? {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ValidationError::MissingField { field: "id" }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn asset_from(fields: &Fields<'_>, stamp: DateTime<Utc>) -> Result<AssetRecord, ValidationError> {
    let itemname = fields.text("itemname")?;
    let manufacturer = fields.text("manufacturer")?;
    let model = fields.text("model")?;
    let precinct = extract_precinct(
        itemname.as_deref(),
        manufacturer.as_deref(),
        model.as_deref(),
    );
    Ok(AssetRecord {
        id: fields.id()?,
        itemname,
        description: fields.text("description")?,
        serial: fields.text("serial")?,
        manufacturer,
        model,
        itemclass: fields.text("itemclass")?,
        itemtype: fields.text("itemtype")?,
        owner: fields.text("owner")?,
        lastseenlocation: fields.text("lastseenlocation")?,
        lastseenperson: fields.text("lastseenperson")?,
        lastseentime: fields.timestamp("lastseentime")?,
        precinct,
        updated_on: stamp,
    })
}

fn history_from(
    fields: &Fields<'_>,
    stamp: DateTime<Utc>,
) -> Result<HistoryRecord, ValidationError> {
    Ok(HistoryRecord {
        id: fields.id()?,
        tagepc: fields.text("tagepc")?,
        lastseenlocationname: fields.text("lastseenlocationname")?,
        lastseenpersonfullname: fields.text("lastseenpersonfullname")?,
        lastseentime: fields.timestamp("lastseentime")?,
        updated_on: stamp,
    })
}

fn reject(index: usize, fields: &Fields<'_>, error: ValidationError) -> Rejected {
    let id = fields.id().ok();
    warn!(index, id = id.as_deref(), error = %error, "Rejected record");
    Rejected { index, id, error }
}

/// Normalize a full asset snapshot, stamping every row with `stamp`.
///
/// Duplicate ids keep the last occurrence.
pub fn normalize_assets(raw: &[RawRecord], stamp: DateTime<Utc>) -> Normalized<AssetRecord> {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    for (index, record) in raw.iter().enumerate() {
        let fields = Fields::extract(record, ASSET_COLUMNS);
        match asset_from(&fields, stamp) {
            Ok(asset) => records.push(asset),
            Err(e) => rejected.push(reject(index, &fields, e)),
        }
    }

    let before = records.len();
    let records = dedupe_by_id(records);
    let duplicates = before - records.len();
    if duplicates > 0 {
        warn!(duplicates, "Snapshot contained duplicate ids, kept last occurrence");
    }
    debug!(
        records = records.len(),
        rejected = rejected.len(),
        "Snapshot normalized"
    );

    Normalized {
        records,
        rejected,
        duplicates,
    }
}

/// Keep the last record for each id, in the order those last records appear.
pub fn dedupe_by_id(records: Vec<AssetRecord>) -> Vec<AssetRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut kept: Vec<AssetRecord> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    kept.reverse();
    kept
}

/// Normalize fetched history, ordered by id.
///
/// Rows without an `id` of their own take the id they were fetched under.
pub fn normalize_history(
    batch: &HashMap<String, Vec<RawRecord>>,
    stamp: DateTime<Utc>,
) -> Normalized<HistoryRecord> {
    let mut ids: Vec<&String> = batch.keys().collect();
    ids.sort();

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    let mut index = 0;
    for id in ids {
        for record in &batch[id] {
            let stamped;
            let record = if raw_field(record, "id").is_some() {
                record
            } else {
                stamped = {
                    let mut owned = record.clone();
                    owned.insert("id".to_owned(), Value::String(id.clone()));
                    owned
                };
                &stamped
            };
            let fields = Fields::extract(record, HISTORY_COLUMNS);
            match history_from(&fields, stamp) {
                Ok(row) => records.push(row),
                Err(e) => rejected.push(reject(index, &fields, e)),
            }
            index += 1;
        }
    }

    Normalized {
        records,
        rejected,
        duplicates: 0,
    }
}
