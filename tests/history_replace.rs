//! Windowed replace of `asset_history`.

mod helpers;

use assetsync::data::history::{for_asset, replace_history};
use assetsync::data::models::ReplaceCounts;
use helpers::make_history;
use sqlx::PgPool;

async fn seed(pool: &PgPool) {
    let rows = vec![
        make_history("a", "EPC-A1", 1),
        make_history("a", "EPC-A2", 2),
        make_history("b", "EPC-B1", 3),
        make_history("c", "EPC-C1", 4),
    ];
    replace_history(pool, &["a".into(), "b".into(), "c".into()], &rows)
        .await
        .unwrap();
}

#[sqlx::test]
async fn test_replaces_only_window_ids(pool: PgPool) {
    seed(&pool).await;

    let fresh = vec![make_history("a", "EPC-A9", 0)];
    let counts = replace_history(&pool, &["a".into(), "b".into()], &fresh)
        .await
        .unwrap();

    assert_eq!(
        counts,
        ReplaceCounts {
            deleted: 3,
            inserted: 1
        }
    );
    let a = for_asset(&pool, "a").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].tagepc.as_deref(), Some("EPC-A9"));
    assert!(for_asset(&pool, "b").await.unwrap().is_empty());
    assert_eq!(for_asset(&pool, "c").await.unwrap().len(), 1);
}

#[sqlx::test]
async fn test_rows_outside_window_are_not_written(pool: PgPool) {
    let rows = vec![make_history("in", "E1", 0), make_history("out", "E2", 0)];
    let counts = replace_history(&pool, &["in".into()], &rows).await.unwrap();

    assert_eq!(counts.inserted, 1);
    assert!(for_asset(&pool, "out").await.unwrap().is_empty());
}

#[sqlx::test]
async fn test_history_is_newest_first(pool: PgPool) {
    seed(&pool).await;
    let a = for_asset(&pool, "a").await.unwrap();
    let tags: Vec<_> = a.iter().filter_map(|r| r.tagepc.as_deref()).collect();
    assert_eq!(tags, vec!["EPC-A1", "EPC-A2"]);
}

#[sqlx::test]
async fn test_empty_window_is_noop(pool: PgPool) {
    seed(&pool).await;
    let counts = replace_history(&pool, &[], &[make_history("a", "E", 0)])
        .await
        .unwrap();
    assert_eq!(counts, ReplaceCounts::default());
    assert_eq!(for_asset(&pool, "a").await.unwrap().len(), 2);
}

#[sqlx::test]
async fn test_failed_insert_rolls_back_delete(pool: PgPool) {
    seed(&pool).await;

    let oversized = vec![make_history("a", &"E".repeat(300), 0)];
    let err = replace_history(&pool, &["a".into(), "b".into()], &oversized)
        .await
        .unwrap_err();
    assert_eq!(err.stage, "history replace");

    assert_eq!(for_asset(&pool, "a").await.unwrap().len(), 2);
    assert_eq!(for_asset(&pool, "b").await.unwrap().len(), 1);
}
