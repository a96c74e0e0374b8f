//! The sync pipeline: snapshot, diff, export, history, derived tables.

pub mod normalize;
pub mod orchestrator;
pub mod precinct;

use crate::api::AssetApi;
use crate::data::models::{ReplaceCounts, SnapshotOutcome};
use crate::data::{assets, history, router_locations};
use crate::export::export_assets;
use crate::trigger::{
    DAG_ASSET_HISTORY, DAG_ASSET_ROUTER_LOCATIONS, DAG_ASSETS, DAG_POLLBOOK_LOCATIONS, DagTrigger,
};
use crate::utils::{fmt_count, fmt_duration};
use anyhow::{Context, Result, bail};
use normalize::{normalize_assets, normalize_history, processing_timestamp};
use orchestrator::FetchOrchestrator;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What one pipeline run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub rejected: usize,
    pub snapshot: SnapshotOutcome,
    /// `None` when the snapshot was unchanged and later stages were skipped.
    pub history: Option<ReplaceCounts>,
    pub router_locations: Option<u64>,
}

impl RunSummary {
    pub fn skipped_downstream(&self) -> bool {
        self.history.is_none()
    }
}

pub struct Pipeline {
    pool: PgPool,
    api: Arc<AssetApi>,
    trigger: DagTrigger,
    export_path: PathBuf,
}

impl Pipeline {
    pub fn new(
        pool: PgPool,
        api: Arc<AssetApi>,
        trigger: DagTrigger,
        export_path: PathBuf,
    ) -> Self {
        Self {
            pool,
            api,
            trigger,
            export_path,
        }
    }

    /// Run every stage in order.
    ///
    /// An unchanged snapshot ends the run after the diff. A failed write stage
    /// aborts the run before any later trigger fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let start = Instant::now();

        let raw = self
            .api
            .get_assets()
            .await
            .context("failed to fetch asset snapshot")?;
        let normalized = normalize_assets(&raw, processing_timestamp());
        if !raw.is_empty() && normalized.records.is_empty() {
            bail!(
                "all {} snapshot records were rejected, refusing to sync",
                raw.len()
            );
        }

        // Rejected records are still listed upstream, so their rows stay.
        let retained = normalized.rejected_ids();
        let snapshot = assets::sync_snapshot(&self.pool, &normalized.records, &retained).await?;
        let mut summary = RunSummary {
            fetched: raw.len(),
            rejected: normalized.rejected.len(),
            snapshot,
            ..Default::default()
        };

        if summary.snapshot.is_noop() {
            info!(
                unchanged = %fmt_count(summary.snapshot.unchanged),
                "No asset changes, skipping downstream stages"
            );
            return Ok(summary);
        }

        if let Err(e) = export_assets(&self.pool, &self.export_path).await {
            warn!(error = ?e, "Asset export failed (non-fatal)");
        }
        self.trigger.notify(DAG_ASSETS).await;

        let replaced = self
            .update_history(
                &summary.snapshot.touched_ids(),
                &summary.snapshot.upserted,
                cancel,
            )
            .await?;
        summary.history = Some(replaced);
        self.trigger.notify(DAG_ASSET_HISTORY).await;
        self.trigger.notify(DAG_POLLBOOK_LOCATIONS).await;

        summary.router_locations = Some(router_locations::rebuild(&self.pool).await?);
        self.trigger.notify(DAG_ASSET_ROUTER_LOCATIONS).await;

        info!(
            fetched = %fmt_count(summary.fetched),
            rejected = summary.rejected,
            deleted = %fmt_count(summary.snapshot.deleted.len()),
            upserted = %fmt_count(summary.snapshot.upserted.len()),
            history_rows = replaced.inserted,
            duration = fmt_duration(start.elapsed()),
            "Sync run complete"
        );
        Ok(summary)
    }

    /// Replace stored history for `delete_ids` and `fetch_ids` with freshly
    /// fetched history for `fetch_ids`.
    ///
    /// Nothing is written unless every id was fetched.
    pub async fn update_history(
        &self,
        delete_ids: &[String],
        fetch_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<ReplaceCounts> {
        let window: Vec<String> = delete_ids
            .iter()
            .chain(fetch_ids)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if window.is_empty() {
            return Ok(ReplaceCounts::default());
        }

        let batch = FetchOrchestrator::new(Arc::clone(&self.api))
            .fetch_all(fetch_ids, cancel)
            .await?;
        let normalized = normalize_history(&batch, processing_timestamp());
        if !normalized.rejected.is_empty() {
            warn!(
                rejected = normalized.rejected.len(),
                "Some history records were rejected"
            );
        }

        Ok(history::replace_history(&self.pool, &window, &normalized.records).await?)
    }
}
