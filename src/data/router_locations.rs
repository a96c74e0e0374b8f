//! Rebuild of the derived `asset_router_locations` table.

use super::TransactionError;
use sqlx::PgPool;
use tracing::info;

const STAGE: &str = "router location rebuild";

/// Repopulate `asset_router_locations` from `assets` joined to routers by precinct.
///
/// Every asset appears at least once; assets without a matching router get
/// null router columns. Returns the number of rows written.
pub async fn rebuild(pool: &PgPool) -> Result<u64, TransactionError> {
    let mut tx = pool.begin().await.map_err(TransactionError::at(STAGE))?;

    let cleared = sqlx::query("DELETE FROM asset_router_locations")
        .execute(&mut *tx)
        .await
        .map_err(TransactionError::at(STAGE))?
        .rows_affected();

    let inserted = sqlx::query(
        r#"
        INSERT INTO asset_router_locations (
            asset_precinct, asset_id, asset_itemname, asset_description, asset_serial,
            asset_manufacturer, asset_model, asset_itemclass, asset_itemtype, asset_owner,
            asset_lastseenlocation, asset_lastseenperson, asset_lastseentime,
            router_account_id, router_actual_firmware_id, router_asset_id,
            router_config_status, router_created_at, router_custom1, router_custom2,
            router_description, router_device_type, router_full_product_name,
            router_group__id, router_id, router_ipv4_address, router_locality, router_mac,
            router_name, router_product_id, router_reboot_required, router_serial_number,
            router_state, router_state_updated_at, router_target_firmware_id,
            router_updated_at, router_upgrade_pending, router_location_accuracy,
            rtr_location_altitude_meters, router_location_id, router_location_latitude,
            router_location_longitude, router_location_method, router_location_updated_at,
            polling_places_placename
        )
        SELECT
            a.precinct, a.id, a.itemname, a.description, a.serial,
            a.manufacturer, a.model, a.itemclass, a.itemtype, a.owner,
            a.lastseenlocation, a.lastseenperson, a.lastseentime,
            r.account_id, r.actual_firmware_id, r.asset_id,
            r.config_status, r.created_at, r.custom1, r.custom2,
            r.description, r.device_type, r.full_product_name,
            r.group__id, r.id, r.ipv4_address, r.locality, r.mac,
            r.name, r.product_id, r.reboot_required, r.serial_number,
            r.state, r.state_updated_at, r.target_firmware_id,
            r.updated_at, r.upgrade_pending, r.location_accuracy,
            r.location_altitude_meters, r.location_id, r.location_latitude,
            r.location_longitude, r.location_method, r.location_updated_at,
            r.polling_places_placename
        FROM assets a
        LEFT JOIN router_precincts rp ON rp.precinct = a.precinct
        LEFT JOIN routers r ON r.id = rp.id
        ORDER BY a.precinct, r.name, a.itemname
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(TransactionError::at(STAGE))?
    .rows_affected();

    tx.commit().await.map_err(TransactionError::at(STAGE))?;

    info!(cleared, inserted, "Router locations rebuilt");
    Ok(inserted)
}
