//! Testing helpers and mock utilities.
//!
//! Provides convenient constructors for mocked ledgers.

use crate::ledger::{LedgerError, MockScanLedger, ScanRecord};

/// Build a record with the given fields.
#[must_use]
pub fn sample_record(
    token_key: &str,
    room_key: &str,
    first_scanner: &str,
    first_valuation: f64,
    scan_time: i64,
) -> ScanRecord {
    ScanRecord {
        token_key: token_key.to_string(),
        room_key: room_key.to_string(),
        first_scanner: first_scanner.to_string(),
        first_valuation,
        scan_time,
    }
}

/// Create a mock ledger whose store is unreachable.
///
/// Every call fails with `LedgerError::Persistence`.
#[must_use]
pub fn mock_ledger_unavailable() -> MockScanLedger {
    let mut mock = MockScanLedger::new();

    mock.expect_lookup()
        .returning(|_, _| Err(LedgerError::Persistence("database is locked".to_string())));

    mock.expect_record_if_absent().returning(|_, _, _, _, _| {
        Err(LedgerError::Persistence("database is locked".to_string()))
    });

    mock
}

/// Create a mock ledger that already holds `record`.
///
/// `lookup` returns it for every key and `record_if_absent` always reports
/// "already recorded".
#[must_use]
pub fn mock_ledger_with_record(record: ScanRecord) -> MockScanLedger {
    let mut mock = MockScanLedger::new();

    mock.expect_lookup()
        .returning(move |_, _| Ok(Some(record.clone())));

    mock.expect_record_if_absent()
        .returning(|_, _, _, _, _| Ok(false));

    mock
}
