//! Windowed replace of the `asset_history` table.

use super::TransactionError;
use super::models::{HistoryRecord, ReplaceCounts};
use crate::utils::fmt_count;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{info, warn};

const STAGE: &str = "history replace";

/// Replace every persisted history row for `ids` with `rows`.
///
/// The delete covers exactly `ids`. Rows whose id is outside `ids` are not
/// written. Both statements share one transaction.
pub async fn replace_history(
    pool: &PgPool,
    ids: &[String],
    rows: &[HistoryRecord],
) -> Result<ReplaceCounts, TransactionError> {
    if ids.is_empty() {
        return Ok(ReplaceCounts::default());
    }

    let window: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let (rows, stray): (Vec<&HistoryRecord>, Vec<&HistoryRecord>) =
        rows.iter().partition(|r| window.contains(r.id.as_str()));
    if !stray.is_empty() {
        warn!(count = stray.len(), "Skipping history rows outside the replace window");
    }

    let mut tx = pool.begin().await.map_err(TransactionError::at(STAGE))?;

    let deleted = sqlx::query("DELETE FROM asset_history WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut *tx)
        .await
        .map_err(TransactionError::at(STAGE))?
        .rows_affected();

    let inserted = if rows.is_empty() {
        0
    } else {
        let row_ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let tags: Vec<Option<&str>> = rows.iter().map(|r| r.tagepc.as_deref()).collect();
        let locations: Vec<Option<&str>> = rows
            .iter()
            .map(|r| r.lastseenlocationname.as_deref())
            .collect();
        let persons: Vec<Option<&str>> = rows
            .iter()
            .map(|r| r.lastseenpersonfullname.as_deref())
            .collect();
        let seen_times: Vec<_> = rows.iter().map(|r| r.lastseentime).collect();
        let updated: Vec<_> = rows.iter().map(|r| r.updated_on).collect();

        sqlx::query(
            r#"
            INSERT INTO asset_history (
                id, tagepc, lastseenlocationname, lastseenpersonfullname,
                lastseentime, updated_on
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[],
                $5::timestamptz[], $6::timestamptz[]
            )
            "#,
        )
        .bind(&row_ids)
        .bind(&tags)
        .bind(&locations)
        .bind(&persons)
        .bind(&seen_times)
        .bind(&updated)
        .execute(&mut *tx)
        .await
        .map_err(TransactionError::at(STAGE))?
        .rows_affected()
    };

    tx.commit().await.map_err(TransactionError::at(STAGE))?;

    info!(
        ids = %fmt_count(ids.len()),
        deleted = %fmt_count(deleted as usize),
        inserted = %fmt_count(inserted as usize),
        "History replaced"
    );
    Ok(ReplaceCounts { deleted, inserted })
}

/// Persisted history for one asset, newest first.
pub async fn for_asset(pool: &PgPool, id: &str) -> Result<Vec<HistoryRecord>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRecord>(
        r#"
        SELECT id, tagepc, lastseenlocationname, lastseenpersonfullname,
               lastseentime, updated_on
        FROM asset_history
        WHERE id = $1
        ORDER BY lastseentime DESC NULLS LAST
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await
}
