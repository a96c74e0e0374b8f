//! Full-snapshot sync of the `assets` table.

use super::TransactionError;
use super::diff::diff_snapshot;
use super::models::{AssetRecord, SnapshotOutcome};
use crate::utils::{fmt_count, log_if_slow};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STAGE: &str = "asset snapshot";

/// All persisted assets, ordered by id.
pub async fn load_all<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<AssetRecord>, sqlx::Error> {
    sqlx::query_as::<_, AssetRecord>(
        r#"
        SELECT id, itemname, description, serial, manufacturer, model, itemclass,
               itemtype, owner, lastseenlocation, lastseenperson, lastseentime,
               precinct, updated_on
        FROM assets
        ORDER BY id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Make the `assets` table equal to `snapshot`, rewriting only rows that changed.
///
/// Persisted rows are read, diffed, deleted and upserted inside one
/// transaction. Unchanged rows keep their `updated_on`. `snapshot` must hold
/// unique ids.
///
/// `retained` lists ids that upstream still reports but whose records were
/// rejected; their persisted rows are left as they are.
pub async fn sync_snapshot(
    pool: &PgPool,
    snapshot: &[AssetRecord],
    retained: &[String],
) -> Result<SnapshotOutcome, TransactionError> {
    let start = Instant::now();
    let mut tx = pool.begin().await.map_err(TransactionError::at(STAGE))?;

    let persisted = load_all(&mut *tx)
        .await
        .map_err(TransactionError::at(STAGE))?;
    let diff = diff_snapshot(&persisted, snapshot, retained);
    debug!(
        persisted = persisted.len(),
        incoming = snapshot.len(),
        retained = retained.len(),
        deleted = diff.deleted.len(),
        changed = diff.changed.len(),
        unchanged = diff.unchanged,
        "Snapshot diffed"
    );

    if diff.is_empty() {
        tx.rollback().await.map_err(TransactionError::at(STAGE))?;
        info!(unchanged = diff.unchanged, "Assets unchanged");
        return Ok(SnapshotOutcome {
            unchanged: diff.unchanged,
            ..Default::default()
        });
    }

    if snapshot.is_empty() && retained.is_empty() {
        warn!(
            count = persisted.len(),
            "Empty snapshot, deleting every persisted asset"
        );
    }

    let mut deleted: Vec<String> = if diff.deleted.is_empty() {
        Vec::new()
    } else {
        sqlx::query_scalar("DELETE FROM assets WHERE id = ANY($1) RETURNING id")
            .bind(&diff.deleted)
            .fetch_all(&mut *tx)
            .await
            .map_err(TransactionError::at(STAGE))?
    };
    deleted.sort();

    let mut upserted = upsert(&mut tx, &diff.changed)
        .await
        .map_err(TransactionError::at(STAGE))?;
    upserted.sort();

    tx.commit().await.map_err(TransactionError::at(STAGE))?;
    log_if_slow(start, Duration::from_secs(5), "asset snapshot sync");

    info!(
        deleted = %fmt_count(deleted.len()),
        upserted = %fmt_count(upserted.len()),
        unchanged = %fmt_count(diff.unchanged),
        "Assets synced"
    );
    Ok(SnapshotOutcome {
        deleted,
        upserted,
        unchanged: diff.unchanged,
    })
}

/// Insert or overwrite `rows` keyed by id, returning the written ids.
async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[&AssetRecord],
) -> Result<Vec<String>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let itemnames: Vec<Option<&str>> = rows.iter().map(|r| r.itemname.as_deref()).collect();
    let descriptions: Vec<Option<&str>> = rows.iter().map(|r| r.description.as_deref()).collect();
    let serials: Vec<Option<&str>> = rows.iter().map(|r| r.serial.as_deref()).collect();
    let manufacturers: Vec<Option<&str>> =
        rows.iter().map(|r| r.manufacturer.as_deref()).collect();
    let models: Vec<Option<&str>> = rows.iter().map(|r| r.model.as_deref()).collect();
    let itemclasses: Vec<Option<&str>> = rows.iter().map(|r| r.itemclass.as_deref()).collect();
    let itemtypes: Vec<Option<&str>> = rows.iter().map(|r| r.itemtype.as_deref()).collect();
    let owners: Vec<Option<&str>> = rows.iter().map(|r| r.owner.as_deref()).collect();
    let locations: Vec<Option<&str>> =
        rows.iter().map(|r| r.lastseenlocation.as_deref()).collect();
    let persons: Vec<Option<&str>> = rows.iter().map(|r| r.lastseenperson.as_deref()).collect();
    let seen_times: Vec<_> = rows.iter().map(|r| r.lastseentime).collect();
    let precincts: Vec<Option<&str>> = rows.iter().map(|r| r.precinct.as_deref()).collect();
    let updated: Vec<_> = rows.iter().map(|r| r.updated_on).collect();

    sqlx::query_scalar(
        r#"
        INSERT INTO assets (
            id, itemname, description, serial, manufacturer, model, itemclass,
            itemtype, owner, lastseenlocation, lastseenperson, lastseentime,
            precinct, updated_on
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[],
            $7::text[], $8::text[], $9::text[], $10::text[], $11::text[],
            $12::timestamptz[], $13::text[], $14::timestamptz[]
        )
        ON CONFLICT (id)
        DO UPDATE SET
            itemname = EXCLUDED.itemname,
            description = EXCLUDED.description,
            serial = EXCLUDED.serial,
            manufacturer = EXCLUDED.manufacturer,
            model = EXCLUDED.model,
            itemclass = EXCLUDED.itemclass,
            itemtype = EXCLUDED.itemtype,
            owner = EXCLUDED.owner,
            lastseenlocation = EXCLUDED.lastseenlocation,
            lastseenperson = EXCLUDED.lastseenperson,
            lastseentime = EXCLUDED.lastseentime,
            precinct = EXCLUDED.precinct,
            updated_on = EXCLUDED.updated_on
        RETURNING id
        "#,
    )
    .bind(&ids)
    .bind(&itemnames)
    .bind(&descriptions)
    .bind(&serials)
    .bind(&manufacturers)
    .bind(&models)
    .bind(&itemclasses)
    .bind(&itemtypes)
    .bind(&owners)
    .bind(&locations)
    .bind(&persons)
    .bind(&seen_times)
    .bind(&precincts)
    .bind(&updated)
    .fetch_all(&mut **tx)
    .await
}
