//! Shared builders for integration tests.
#![allow(dead_code)]

use assetsync::data::models::{AssetRecord, HistoryRecord};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

/// A fixed, microsecond-aligned processing stamp.
pub fn stamp(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
}

pub fn make_asset(id: &str, itemname: &str, updated_on: DateTime<Utc>) -> AssetRecord {
    AssetRecord {
        id: id.to_owned(),
        itemname: Some(itemname.to_owned()),
        description: Some("Electronic pollbook".to_owned()),
        serial: Some(format!("SN-{id}")),
        manufacturer: None,
        model: None,
        itemclass: Some("Pollbook".to_owned()),
        itemtype: None,
        owner: Some("Elections".to_owned()),
        lastseenlocation: Some("Warehouse".to_owned()),
        lastseenperson: None,
        lastseentime: Some(Utc.with_ymd_and_hms(2024, 5, 30, 9, 15, 0).unwrap()),
        precinct: None,
        updated_on,
    }
}

pub fn make_history(id: &str, tag: &str, days_ago: i64) -> HistoryRecord {
    HistoryRecord {
        id: id.to_owned(),
        tagepc: Some(tag.to_owned()),
        lastseenlocationname: Some("Warehouse".to_owned()),
        lastseenpersonfullname: Some("Sam Doe".to_owned()),
        lastseentime: Some(stamp(1) - TimeDelta::days(days_ago)),
        updated_on: stamp(1),
    }
}
