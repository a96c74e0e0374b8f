//! Bounded concurrent history fetch across many assets.

use crate::api::history::HistoryCursor;
use crate::api::models::RawRecord;
use crate::api::{ApiError, AssetApi, Session};
use crate::utils::{fmt_count, fmt_duration};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Upper bound on simultaneous fetch workers.
pub const MAX_CONCURRENT: usize = 20;

pub type HistoryBatch = HashMap<String, Vec<RawRecord>>;

/// One asset's history could not be fetched.
#[derive(Debug, Error)]
#[error("history fetch for '{id}' failed")]
pub struct FatalFetchError {
    pub id: String,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Error)]
pub enum FetchAllError {
    /// Every worker finished but some ids failed.
    #[error("{} of {total} history fetches failed", .failures.len())]
    Failed {
        failures: Vec<FatalFetchError>,
        partial: HistoryBatch,
        total: usize,
    },

    /// Shutdown was requested before every id was fetched.
    ///
    /// `partial` also holds the pages already fetched for ids whose walk was
    /// cut short; those ids are listed in `interrupted`.
    #[error("history fetch cancelled with {outstanding} ids outstanding")]
    Cancelled {
        partial: HistoryBatch,
        interrupted: Vec<String>,
        outstanding: usize,
    },
}

#[derive(Default)]
struct Collected {
    fetched: HistoryBatch,
    interrupted: HistoryBatch,
    failures: Vec<FatalFetchError>,
}

/// How one id's page walk ended.
enum Walk {
    Complete(Vec<RawRecord>),
    /// Cancelled between pages, holding the pages fetched so far.
    Interrupted(Vec<RawRecord>),
}

/// Fans history fetches for many ids out over a bounded worker pool.
///
/// Workers share one token refresher through the [`AssetApi`], but each builds
/// its own HTTP session when it starts and drops it when the queue is empty.
pub struct FetchOrchestrator {
    api: Arc<AssetApi>,
    max_workers: usize,
}

impl FetchOrchestrator {
    pub fn new(api: Arc<AssetApi>) -> Self {
        Self::with_max_workers(api, MAX_CONCURRENT)
    }

    pub fn with_max_workers(api: Arc<AssetApi>, max_workers: usize) -> Self {
        Self {
            api,
            max_workers: max_workers.max(1),
        }
    }

    /// Fetch the history of every id in `ids`.
    ///
    /// A failing id does not stop the others; once all workers have joined,
    /// any failure fails the whole call with the successful ids attached.
    /// Cancellation is observed between pages.
    pub async fn fetch_all(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<HistoryBatch, FetchAllError> {
        let mut seen = HashSet::new();
        let queue: VecDeque<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let total = queue.len();
        if total == 0 {
            return Ok(HistoryBatch::new());
        }

        let workers = total.min(self.max_workers);
        let start = Instant::now();
        info!(
            ids = %fmt_count(total),
            workers,
            "Starting history fetch"
        );

        let queue = Arc::new(Mutex::new(queue));
        let collected = Arc::new(Mutex::new(Collected::default()));
        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let worker = FetchWorker {
                id: worker_id,
                api: Arc::clone(&self.api),
                queue: Arc::clone(&queue),
                collected: Arc::clone(&collected),
            };
            let cancel = cancel.clone();
            let span = tracing::debug_span!("fetch_worker", worker_id);
            set.spawn(async move { worker.run(cancel).await }.instrument(span));
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Fetch worker panicked");
            }
        }

        let Collected {
            mut fetched,
            interrupted,
            mut failures,
        } = std::mem::take(&mut *collected.lock().await);

        if cancel.is_cancelled() {
            let outstanding = total - fetched.len() - failures.len();
            warn!(
                fetched = fetched.len(),
                interrupted = interrupted.len(),
                failed = failures.len(),
                outstanding,
                "History fetch cancelled"
            );
            let mut interrupted_ids: Vec<String> = interrupted.keys().cloned().collect();
            interrupted_ids.sort();
            fetched.extend(interrupted);
            return Err(FetchAllError::Cancelled {
                partial: fetched,
                interrupted: interrupted_ids,
                outstanding,
            });
        }

        // Left in the queue or dropped by a worker that could not start.
        let reported: HashSet<&str> = fetched
            .keys()
            .map(String::as_str)
            .chain(failures.iter().map(|f| f.id.as_str()))
            .collect();
        let missing: Vec<String> = seen
            .into_iter()
            .filter(|id| !reported.contains(id))
            .map(str::to_owned)
            .collect();
        for id in missing {
            failures.push(FatalFetchError {
                id,
                source: ApiError::RequestFailed(anyhow::anyhow!("no worker fetched this id")),
            });
        }

        let records: usize = fetched.values().map(Vec::len).sum();
        info!(
            fetched = %fmt_count(fetched.len()),
            failed = failures.len(),
            records = %fmt_count(records),
            duration = fmt_duration(start.elapsed()),
            "History fetch finished"
        );

        if failures.is_empty() {
            Ok(fetched)
        } else {
            for failure in &failures {
                error!(id = failure.id.as_str(), error = %failure.source, "History fetch failed");
            }
            Err(FetchAllError::Failed {
                failures,
                partial: fetched,
                total,
            })
        }
    }
}

struct FetchWorker {
    id: usize,
    api: Arc<AssetApi>,
    queue: Arc<Mutex<VecDeque<String>>>,
    collected: Arc<Mutex<Collected>>,
}

impl FetchWorker {
    async fn run(self, cancel: CancellationToken) {
        let session = match self.api.session() {
            Ok(session) => session,
            Err(e) => {
                error!(worker_id = self.id, error = ?e, "Failed to build HTTP session");
                return;
            }
        };
        debug!(worker_id = self.id, "Fetch worker started");

        let mut processed = 0usize;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(id) = self.queue.lock().await.pop_front() else {
                break;
            };

            match self.fetch_one(&session, &id, &cancel).await {
                Ok(Walk::Complete(records)) => {
                    self.collected.lock().await.fetched.insert(id, records);
                }
                // The id stays outstanding; its pages are kept as partial results.
                Ok(Walk::Interrupted(records)) => {
                    self.collected.lock().await.interrupted.insert(id, records);
                    break;
                }
                Err(source) => {
                    self.collected
                        .lock()
                        .await
                        .failures
                        .push(FatalFetchError { id, source });
                }
            }
            processed += 1;
        }

        debug!(worker_id = self.id, processed, "Fetch worker exiting");
    }

    /// Walk every page for `id`, stopping between pages on cancellation.
    async fn fetch_one(
        &self,
        session: &Session,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Walk, ApiError> {
        let mut cursor = HistoryCursor::new(&self.api, session, id);
        let mut records = Vec::new();
        loop {
            if cancel.is_cancelled() {
                debug!(id, pages = cursor.pages_requested(), "Fetch interrupted by shutdown");
                return Ok(Walk::Interrupted(records));
            }
            match cursor.next_page().await {
                Some(page) => records.extend(page?),
                None => break,
            }
        }
        debug!(
            id,
            records = records.len(),
            pages = cursor.pages_requested(),
            "History fetched"
        );
        Ok(Walk::Complete(records))
    }
}
