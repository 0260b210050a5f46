use chrono::NaiveDate;
use thiserror::Error;

use crate::data::RepositoryError;
use crate::pricing::EnrichError;

/// Errors from trade construction, matching and valuation.
///
/// `DataUnavailable` and `SelectionFailed` are expected during random search
/// and callers move on to another draw. `InvariantViolation` means a bug or
/// corrupt data and should stop the run, as should repository failures.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("no quotes for {symbol} on {date}")]
    DataUnavailable { symbol: String, date: NaiveDate },

    #[error("leg selection failed: {0}")]
    SelectionFailed(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Enrich(#[from] EnrichError),
}

impl TradeError {
    /// Whether the caller may skip this trade and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. } | Self::SelectionFailed(_)
        )
    }
}
