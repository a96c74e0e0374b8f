//! Database models and schema.

pub mod assets;
pub mod diff;
pub mod history;
pub mod models;
pub mod router_locations;

use thiserror::Error;

/// A write stage failed and its transaction was rolled back.
///
/// Nothing from the stage is visible; downstream stages must not run.
#[derive(Debug, Error)]
#[error("{stage} transaction rolled back")]
pub struct TransactionError {
    pub stage: &'static str,
    #[source]
    pub source: sqlx::Error,
}

impl TransactionError {
    pub(crate) fn at(stage: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self { stage, source }
    }
}
