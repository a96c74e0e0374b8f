//! Local export of the authoritative asset table.
//!
//! Timestamps are written as naive wall-clock times in the reporting zone,
//! which is what spreadsheet consumers of the file expect.

use crate::data::assets;
use crate::data::models::AssetRecord;
use crate::sync::normalize::REPORTING_TZ;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    itemname: Option<&'a str>,
    description: Option<&'a str>,
    serial: Option<&'a str>,
    manufacturer: Option<&'a str>,
    model: Option<&'a str>,
    itemclass: Option<&'a str>,
    itemtype: Option<&'a str>,
    owner: Option<&'a str>,
    lastseenlocation: Option<&'a str>,
    lastseenperson: Option<&'a str>,
    lastseentime: Option<NaiveDateTime>,
    precinct: Option<&'a str>,
    updated_on: NaiveDateTime,
}

impl<'a> From<&'a AssetRecord> for ExportRow<'a> {
    fn from(r: &'a AssetRecord) -> Self {
        Self {
            id: &r.id,
            itemname: r.itemname.as_deref(),
            description: r.description.as_deref(),
            serial: r.serial.as_deref(),
            manufacturer: r.manufacturer.as_deref(),
            model: r.model.as_deref(),
            itemclass: r.itemclass.as_deref(),
            itemtype: r.itemtype.as_deref(),
            owner: r.owner.as_deref(),
            lastseenlocation: r.lastseenlocation.as_deref(),
            lastseenperson: r.lastseenperson.as_deref(),
            lastseentime: r.lastseentime.map(local_time),
            precinct: r.precinct.as_deref(),
            updated_on: local_time(r.updated_on),
        }
    }
}

/// Wall-clock time in the reporting zone, offset dropped.
pub fn local_time(ts: DateTime<Utc>) -> NaiveDateTime {
    ts.with_timezone(&REPORTING_TZ).naive_local()
}

/// Serialize `rows` as a JSON array in reporting-zone time.
pub fn render(rows: &[AssetRecord]) -> serde_json::Result<Vec<u8>> {
    let rows: Vec<ExportRow<'_>> = rows.iter().map(ExportRow::from).collect();
    let mut body = serde_json::to_vec_pretty(&rows)?;
    body.push(b'\n');
    Ok(body)
}

/// Write every persisted asset to `path`, returning the row count.
pub async fn export_assets(pool: &PgPool, path: &Path) -> Result<usize> {
    let rows = assets::load_all(pool)
        .await
        .context("failed to load assets for export")?;
    let body = render(&rows).context("failed to serialize export")?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;

    info!(rows = rows.len(), path = %path.display(), "Assets exported");
    Ok(rows.len())
}
