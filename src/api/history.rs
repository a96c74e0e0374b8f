//! Page-by-page walk of one asset's observation history.

use super::models::{ObservationPage, RawRecord, parse_api_timestamp, raw_field};
use super::{ApiError, AssetApi, Session};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Observations older than this are not fetched.
pub const HISTORY_WINDOW_DAYS: i64 = 365;

/// Why a page ended (or did not end) the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// No records; the page is discarded.
    Exhausted,
    /// Fewer entities than a full page; kept, and nothing follows it.
    LastPage,
    /// Last record is outside the history window; kept, nothing older is wanted.
    AgeCutoff,
    Continue,
}

impl PageVerdict {
    pub fn keeps_page(self) -> bool {
        !matches!(self, PageVerdict::Exhausted)
    }

    pub fn is_final(self) -> bool {
        !matches!(self, PageVerdict::Continue)
    }
}

/// Decide how `page` affects the walk. The first matching condition wins.
pub fn evaluate_page(page: &ObservationPage, cutoff: DateTime<Utc>) -> PageVerdict {
    let Some(last) = page.data.last() else {
        return PageVerdict::Exhausted;
    };
    if page.total_entity_count < page.page_length {
        return PageVerdict::LastPage;
    }
    match raw_field(last, "lastSeenTime") {
        Some(Value::String(raw)) => match parse_api_timestamp(raw) {
            Some(seen) if seen < cutoff => PageVerdict::AgeCutoff,
            Some(_) => PageVerdict::Continue,
            None => {
                warn!(value = raw.as_str(), "Unparseable lastSeenTime, continuing pagination");
                PageVerdict::Continue
            }
        },
        _ => PageVerdict::Continue,
    }
}

/// Pagination cursor for one entity.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub page: u32,
    pub cutoff: DateTime<Utc>,
}

impl FetchWindow {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            page: 1,
            cutoff: now - TimeDelta::days(HISTORY_WINDOW_DAYS),
        }
    }
}

/// Lazy, single-use sequence of history pages for one asset.
///
/// Each call to [`next_page`](Self::next_page) issues at most one page
/// request. Once a final page or an error has been returned, the cursor yields
/// `None` forever.
pub struct HistoryCursor<'a> {
    api: &'a AssetApi,
    session: &'a Session,
    id: String,
    window: FetchWindow,
    finished: bool,
    last_verdict: Option<PageVerdict>,
}

impl<'a> HistoryCursor<'a> {
    pub fn new(api: &'a AssetApi, session: &'a Session, id: impl Into<String>) -> Self {
        Self::with_window(api, session, id, FetchWindow::starting_at(Utc::now()))
    }

    pub fn with_window(
        api: &'a AssetApi,
        session: &'a Session,
        id: impl Into<String>,
        window: FetchWindow,
    ) -> Self {
        Self {
            api,
            session,
            id: id.into(),
            window,
            finished: false,
            last_verdict: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pages requested so far.
    pub fn pages_requested(&self) -> u32 {
        if self.finished {
            self.window.page
        } else {
            self.window.page - 1
        }
    }

    pub fn last_verdict(&self) -> Option<PageVerdict> {
        self.last_verdict
    }

    /// Records of the next kept page, each stamped with this cursor's id.
    pub async fn next_page(&mut self) -> Option<Result<Vec<RawRecord>, ApiError>> {
        if self.finished {
            return None;
        }

        let page = match self
            .api
            .get_observations(self.session, &self.id, self.window.page)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        let verdict = evaluate_page(&page, self.window.cutoff);
        self.last_verdict = Some(verdict);
        debug!(
            id = self.id.as_str(),
            page = self.window.page,
            records = page.data.len(),
            verdict = ?verdict,
            "History page received"
        );

        if verdict.is_final() {
            self.finished = true;
        } else {
            self.window.page += 1;
        }
        if !verdict.keeps_page() {
            return None;
        }

        let id = Value::String(self.id.clone());
        let records = page
            .data
            .into_iter()
            .map(|mut record| {
                record.insert("id".to_owned(), id.clone());
                record
            })
            .collect();
        Some(Ok(records))
    }
}
