#![deny(missing_docs)]
//! Memewatch first-scan ledger.
//!
//! Tracks which user first scanned a token in each chat room, and at what
//! valuation, so later scans can report whether the token pumped or dipped.

/// Configuration management.
pub mod config;
/// Line-oriented scan event dispatcher.
pub mod dispatch;
/// First-scan ledger and price history storage.
pub mod ledger;
/// Resource teardown.
pub mod lifecycle;
/// Log output redaction.
pub mod logging;
/// Scan handling policy on top of the ledger.
pub mod scan;
/// Trend derivation.
pub mod trend;
/// Formatting helpers.
pub mod utils;

/// Mock ledgers for unit tests.
#[cfg(test)]
pub mod testing;
