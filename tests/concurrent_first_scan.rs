use memewatch::config::LedgerSettings;
use memewatch::ledger::{ScanLedger, SqliteLedger};
use memewatch::scan::{Provenance, Quote, ScanRequest, ScanService};
use std::sync::Arc;
use tokio::task::JoinSet;

const RACERS: usize = 32;

fn open_shared(dir: &tempfile::TempDir) -> Arc<SqliteLedger> {
    let settings = LedgerSettings {
        database_path: dir.path().join("race.db").to_string_lossy().into_owned(),
        operation_timeout_ms: 15_000,
        ..LedgerSettings::default()
    };
    Arc::new(SqliteLedger::open(&settings).expect("open ledger"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_scans_have_exactly_one_winner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_shared(&dir);

    let mut racers = JoinSet::new();
    for i in 0..RACERS {
        let ledger = ledger.clone();
        racers.spawn(async move {
            let scanner = format!("U{i}");
            let valuation = 1_000.0 + i as f64;
            let won = ledger
                .record_if_absent("NEW_TOKEN", "R1", &scanner, valuation, 100 + i as i64)
                .await
                .expect("record_if_absent");
            (scanner, valuation, won)
        });
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    while let Some(joined) = racers.join_next().await {
        let (scanner, valuation, won) = joined.expect("racer task");
        if won {
            winners.push((scanner, valuation));
        } else {
            losers += 1;
        }
    }

    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    assert_eq!(losers, RACERS - 1);

    let stored = ledger
        .lookup("NEW_TOKEN", "R1")
        .await
        .expect("lookup")
        .expect("record exists");
    let (scanner, valuation) = &winners[0];
    assert_eq!(&stored.first_scanner, scanner);
    assert!((stored.first_valuation - valuation).abs() < f64::EPSILON);
    assert_eq!(ledger.scan_count().await.expect("count"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_scans_through_service_agree_on_first_scanner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = Arc::new(ScanService::new(open_shared(&dir)));
    let at = chrono::DateTime::from_timestamp(1_000, 0).expect("timestamp");

    let mut scans = JoinSet::new();
    for i in 0..16 {
        let service = service.clone();
        scans.spawn(async move {
            service
                .scan(
                    ScanRequest::new("HOT", "R7", format!("U{i}")),
                    Quote::valuation(2_000.0),
                    at,
                )
                .await
        });
    }

    let mut first_scans = Vec::new();
    let mut credited = Vec::new();
    while let Some(joined) = scans.join_next().await {
        let report = joined.expect("scan task");
        match report.provenance {
            Provenance::FirstScan => first_scans.push(report.request.scanner_id),
            Provenance::SeenBefore { record, .. } => credited.push(record.first_scanner),
            Provenance::Unknown => panic!("ledger unexpectedly unavailable"),
        }
    }

    assert_eq!(first_scans.len(), 1);
    assert_eq!(credited.len(), 15);
    assert!(credited.iter().all(|s| s == &first_scans[0]));
}
