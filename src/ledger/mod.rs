//! First-scan ledger
//!
//! Records, per `(token_key, room_key)` pair, who scanned a token first and
//! at what valuation. A record is written once and never touched again, so
//! every pair moves from unscanned to scanned exactly one time.

mod history;
mod sqlite;

pub use history::{PriceHistory, PriceSample};
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The store could not be opened, read or written
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// The call did not complete within the configured bound
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),
    /// Arguments rejected before touching the store
    #[error("Invalid scan record: {0}")]
    InvalidRecord(String),
}

impl LedgerError {
    /// Whether this is a storage-side fault the caller should degrade on.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Timeout(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<r2d2::Error> for LedgerError {
    fn from(err: r2d2::Error) -> Self {
        Self::Persistence(format!("connection pool: {err}"))
    }
}

/// First-scan provenance for one token in one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Contract address or canonical symbol
    pub token_key: String,
    /// Chat room or guild identifier
    pub room_key: String,
    /// User who triggered the first scan
    pub first_scanner: String,
    /// Valuation at first scan; zero when upstream data was missing
    pub first_valuation: f64,
    /// Seconds since the Unix epoch (UTC)
    pub scan_time: i64,
}

impl ScanRecord {
    /// First scan time as a UTC timestamp, if representable.
    #[must_use]
    pub fn scanned_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.scan_time, 0)
    }
}

/// Interface for first-scan ledgers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanLedger: Send + Sync {
    /// Store a first-scan record unless one already exists for the pair.
    ///
    /// Returns `true` when this call created the record and `false` when the
    /// pair had already been scanned. Concurrent callers for the same pair
    /// see exactly one `true`.
    async fn record_if_absent(
        &self,
        token_key: &str,
        room_key: &str,
        scanner_id: &str,
        valuation: f64,
        scan_time: i64,
    ) -> Result<bool, LedgerError>;

    /// Fetch the first-scan record for the pair, `None` if never scanned.
    async fn lookup(&self, token_key: &str, room_key: &str)
        -> Result<Option<ScanRecord>, LedgerError>;
}

/// Reject arguments that would break the record invariants.
pub(crate) fn validate_scan(
    token_key: &str,
    room_key: &str,
    valuation: f64,
) -> Result<(), LedgerError> {
    if token_key.trim().is_empty() {
        return Err(LedgerError::InvalidRecord("token key is empty".into()));
    }
    if room_key.trim().is_empty() {
        return Err(LedgerError::InvalidRecord("room key is empty".into()));
    }
    validate_amount("valuation", valuation)
}

pub(crate) fn validate_amount(field: &str, value: f64) -> Result<(), LedgerError> {
    if !value.is_finite() || value < 0.0 {
        return Err(LedgerError::InvalidRecord(format!(
            "{field} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}
