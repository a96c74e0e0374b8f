//! Rebuild of `asset_router_locations` from assets and router tables.

mod helpers;

use assetsync::data::assets::sync_snapshot;
use assetsync::data::router_locations::rebuild;
use helpers::{make_asset, stamp};
use sqlx::PgPool;

fn with_precinct(id: &str, precinct: Option<&str>) -> assetsync::data::models::AssetRecord {
    let mut asset = make_asset(id, &format!("Pollbook {id}"), stamp(1));
    asset.precinct = precinct.map(str::to_owned);
    asset
}

#[sqlx::test(fixtures("routers"))]
async fn test_joins_assets_to_routers_by_precinct(pool: PgPool) {
    sync_snapshot(
        &pool,
        &[
            with_precinct("a1", Some("01-01")),
            with_precinct("a2", Some("09-09")),
            with_precinct("a3", None),
        ],
        &[],
    )
    .await
    .unwrap();

    let written = rebuild(&pool).await.unwrap();
    assert_eq!(written, 3);

    let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT asset_id, router_name, polling_places_placename
        FROM asset_router_locations
        ORDER BY asset_id
        "#,
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        rows[0],
        (
            "a1".to_owned(),
            Some("RTR-0101".to_owned()),
            Some("Ward 1 Rec Center".to_owned())
        )
    );
    assert_eq!(rows[1].1, None);
    assert_eq!(rows[2].1, None);
}

#[sqlx::test(fixtures("routers"))]
async fn test_rebuild_replaces_previous_rows(pool: PgPool) {
    sync_snapshot(&pool, &[with_precinct("a1", Some("01-01"))], &[])
        .await
        .unwrap();
    rebuild(&pool).await.unwrap();

    sync_snapshot(&pool, &[with_precinct("b1", Some("01-01"))], &[])
        .await
        .unwrap();
    assert_eq!(rebuild(&pool).await.unwrap(), 1);

    let ids: Vec<String> = sqlx::query_scalar("SELECT asset_id FROM asset_router_locations")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(ids, vec!["b1"]);
}

#[sqlx::test]
async fn test_missing_router_tables_roll_back(pool: PgPool) {
    sync_snapshot(&pool, &[with_precinct("a1", Some("01-01"))], &[])
        .await
        .unwrap();
    let err = rebuild(&pool).await.unwrap_err();
    assert_eq!(err.stage, "router location rebuild");
}
