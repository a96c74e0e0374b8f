//! Full-snapshot sync of the `assets` table against a real database.

mod helpers;

use assetsync::data::assets::{load_all, sync_snapshot};
use helpers::{make_asset, stamp};
use sqlx::PgPool;

#[sqlx::test]
async fn test_deletes_missing_and_inserts_new(pool: PgPool) {
    let seeded = vec![
        make_asset("id1", "Pollbook 01-01", stamp(1)),
        make_asset("id2", "Pollbook 01-02", stamp(1)),
    ];
    sync_snapshot(&pool, &seeded, &[]).await.unwrap();

    let snapshot = vec![
        make_asset("id1", "Pollbook 01-01", stamp(2)),
        make_asset("id3", "Pollbook 01-03", stamp(2)),
    ];
    let outcome = sync_snapshot(&pool, &snapshot, &[]).await.unwrap();

    assert_eq!(outcome.deleted, vec!["id2"]);
    assert_eq!(outcome.upserted, vec!["id3"]);
    assert_eq!(outcome.unchanged, 1);

    let rows = load_all(&pool).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["id1", "id3"]);
    // id1 was untouched, so its watermark did not move
    assert_eq!(rows[0].updated_on, stamp(1));
    assert_eq!(rows[1].updated_on, stamp(2));
}

#[sqlx::test]
async fn test_second_sync_of_same_snapshot_is_noop(pool: PgPool) {
    let snapshot = vec![
        make_asset("a", "Pollbook 02-01", stamp(1)),
        make_asset("b", "Pollbook 02-02", stamp(1)),
    ];
    let first = sync_snapshot(&pool, &snapshot, &[]).await.unwrap();
    assert_eq!(first.upserted.len(), 2);

    let restamped: Vec<_> = snapshot
        .iter()
        .cloned()
        .map(|mut r| {
            r.updated_on = stamp(5);
            r
        })
        .collect();
    let second = sync_snapshot(&pool, &restamped, &[]).await.unwrap();
    assert!(second.is_noop(), "{second:?}");
    assert_eq!(second.unchanged, 2);

    let rows = load_all(&pool).await.unwrap();
    assert!(rows.iter().all(|r| r.updated_on == stamp(1)));
}

#[sqlx::test]
async fn test_changed_row_is_overwritten(pool: PgPool) {
    sync_snapshot(&pool, &[make_asset("x", "Pollbook 03-01", stamp(1))], &[])
        .await
        .unwrap();

    let mut changed = make_asset("x", "Pollbook 03-01", stamp(3));
    changed.lastseenlocation = Some("Precinct 03-01".into());
    let outcome = sync_snapshot(&pool, &[changed.clone()], &[]).await.unwrap();
    assert_eq!(outcome.upserted, vec!["x"]);
    assert!(outcome.deleted.is_empty());

    let rows = load_all(&pool).await.unwrap();
    assert_eq!(rows, vec![changed]);
}

#[sqlx::test]
async fn test_empty_snapshot_clears_table(pool: PgPool) {
    sync_snapshot(
        &pool,
        &[
            make_asset("p", "Pollbook 04-01", stamp(1)),
            make_asset("q", "Pollbook 04-02", stamp(1)),
        ],
        &[],
    )
    .await
    .unwrap();

    let outcome = sync_snapshot(&pool, &[], &[]).await.unwrap();
    assert_eq!(outcome.deleted, vec!["p", "q"]);
    assert!(load_all(&pool).await.unwrap().is_empty());
}

#[sqlx::test]
async fn test_retained_ids_survive_their_absence(pool: PgPool) {
    sync_snapshot(
        &pool,
        &[
            make_asset("kept", "Pollbook 05-01", stamp(1)),
            make_asset("gone", "Pollbook 05-02", stamp(1)),
        ],
        &[],
    )
    .await
    .unwrap();

    let outcome = sync_snapshot(&pool, &[], &["kept".to_owned()]).await.unwrap();
    assert_eq!(outcome.deleted, vec!["gone"]);

    let rows = load_all(&pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "kept");
    assert_eq!(rows[0].updated_on, stamp(1));
}

#[sqlx::test]
async fn test_failed_upsert_rolls_back_delete(pool: PgPool) {
    let seeded = vec![
        make_asset("p", "Pollbook 06-01", stamp(1)),
        make_asset("q", "Pollbook 06-02", stamp(1)),
    ];
    sync_snapshot(&pool, &seeded, &[]).await.unwrap();

    // p is deleted first, then r overflows its column
    let snapshot = vec![
        make_asset("q", "Pollbook 06-02", stamp(2)),
        make_asset("r", &"x".repeat(300), stamp(2)),
    ];
    let err = sync_snapshot(&pool, &snapshot, &[]).await.unwrap_err();
    assert_eq!(err.stage, "asset snapshot");

    assert_eq!(load_all(&pool).await.unwrap(), seeded);
}
