//! SQLite-backed ledger.
//!
//! Blocking SQLite calls run on the blocking thread pool through an r2d2
//! connection pool. The composite primary key on `token_scans` arbitrates
//! concurrent first scans; there is no application-level lock.

use super::{
    validate_amount, validate_scan, LedgerError, PriceHistory, PriceSample, ScanLedger,
    ScanRecord,
};
use crate::config::{
    LedgerSettings, STARTUP_INITIAL_BACKOFF_MS, STARTUP_MAX_BACKOFF_MS, STARTUP_MAX_RETRIES,
};
use crate::lifecycle::Closeable;
use async_trait::async_trait;
use moka::future::Cache;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS token_scans (
        token_key TEXT NOT NULL,
        room_key TEXT NOT NULL,
        first_scanner TEXT NOT NULL,
        first_valuation REAL NOT NULL,
        scan_time INTEGER NOT NULL,
        PRIMARY KEY (token_key, room_key)
    );
    CREATE TABLE IF NOT EXISTS price_history (
        token_key TEXT NOT NULL,
        price REAL NOT NULL,
        valuation REAL NOT NULL,
        sample_time INTEGER NOT NULL,
        PRIMARY KEY (token_key, sample_time)
    );
";

// Conflicts on the primary key are the expected "already scanned" outcome;
// every other constraint failure still surfaces as an error.
const INSERT_SCAN: &str = "
    INSERT INTO token_scans (token_key, room_key, first_scanner, first_valuation, scan_time)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (token_key, room_key) DO NOTHING";

const SELECT_SCAN: &str = "
    SELECT token_key, room_key, first_scanner, first_valuation, scan_time
    FROM token_scans
    WHERE token_key = ?1 AND room_key = ?2";

const INSERT_SAMPLE: &str = "
    INSERT INTO price_history (token_key, price, valuation, sample_time)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (token_key, sample_time) DO NOTHING";

const SELECT_SAMPLES: &str = "
    SELECT token_key, price, valuation, sample_time
    FROM price_history
    WHERE token_key = ?1
    ORDER BY sample_time DESC
    LIMIT ?2";

type RecordKey = (String, String);

/// SQLite ledger with a read-through cache of known records.
///
/// Records never change once written, so cached entries cannot go stale.
pub struct SqliteLedger {
    pool: Pool<SqliteConnectionManager>,
    cache: Cache<RecordKey, ScanRecord>,
    operation_timeout: Duration,
    path: PathBuf,
}

impl SqliteLedger {
    /// Open (or create) the ledger database described by `settings`.
    ///
    /// This blocks on file I/O; async callers should prefer
    /// [`SqliteLedger::open_with_retry`].
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Persistence` if the directory, schema or
    /// connection pool cannot be set up.
    pub fn open(settings: &LedgerSettings) -> Result<Self, LedgerError> {
        let path = PathBuf::from(&settings.database_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Persistence(format!("Failed to create data directory: {e}"))
                })?;
            }
        }

        let busy_timeout = settings.busy_timeout();
        prepare_database(&path, busy_timeout)?;

        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        });

        let operation_timeout = settings.operation_timeout();
        let pool = Pool::builder()
            .max_size(settings.pool_size.max(1))
            .connection_timeout(operation_timeout)
            .build(manager)?;

        let cache = Cache::builder()
            .max_capacity(settings.record_cache_capacity)
            .build();

        info!("Scan ledger opened at {}", path.display());

        Ok(Self {
            pool,
            cache,
            operation_timeout,
            path,
        })
    }

    /// Open the ledger, retrying transient start-up failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last `LedgerError` once all attempts are exhausted.
    pub async fn open_with_retry(settings: &LedgerSettings) -> Result<Self, LedgerError> {
        let retry_strategy = ExponentialBackoff::from_millis(STARTUP_INITIAL_BACKOFF_MS)
            .max_delay(Duration::from_millis(STARTUP_MAX_BACKOFF_MS))
            .map(jitter)
            .take(STARTUP_MAX_RETRIES);

        Retry::spawn(retry_strategy, || {
            let settings = settings.clone();
            async move {
                match tokio::task::spawn_blocking(move || Self::open(&settings)).await {
                    Ok(result) => result,
                    Err(e) => Err(LedgerError::Persistence(format!("open task failed: {e}"))),
                }
            }
        })
        .await
        .map_err(|e| {
            warn!(
                "Opening scan ledger failed after {} attempts: {}",
                STARTUP_MAX_RETRIES, e
            );
            e
        })
    }

    /// Database file backing this ledger
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of first-scan records stored across all rooms.
    ///
    /// # Errors
    ///
    /// Returns a `LedgerError` on storage failure or timeout.
    pub async fn scan_count(&self) -> Result<u64, LedgerError> {
        self.run_blocking("scan_count", |conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM token_scans", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Run `op` on a pooled connection off the async executor, bounded by
    /// the operation timeout.
    async fn run_blocking<T, F>(&self, name: &'static str, op: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut *conn)
        });

        match tokio::time::timeout(self.operation_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(LedgerError::Persistence(format!("{name} task failed: {e}"))),
            Err(_) => {
                // The detached task keeps running and may still commit.
                warn!(
                    "Ledger {} exceeded {:?}, giving up",
                    name, self.operation_timeout
                );
                Err(LedgerError::Timeout(self.operation_timeout))
            }
        }
    }
}

/// Create the schema and switch the file to WAL once, before pooling.
fn prepare_database(path: &Path, busy_timeout: Duration) -> Result<(), LedgerError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("SQLite journal mode: {}", mode);
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    Ok(ScanRecord {
        token_key: row.get(0)?,
        room_key: row.get(1)?,
        first_scanner: row.get(2)?,
        first_valuation: row.get(3)?,
        scan_time: row.get(4)?,
    })
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<PriceSample> {
    Ok(PriceSample {
        token_key: row.get(0)?,
        price: row.get(1)?,
        valuation: row.get(2)?,
        sample_time: row.get(3)?,
    })
}

fn record_key(token_key: &str, room_key: &str) -> RecordKey {
    (token_key.to_string(), room_key.to_string())
}

#[async_trait]
impl ScanLedger for SqliteLedger {
    async fn record_if_absent(
        &self,
        token_key: &str,
        room_key: &str,
        scanner_id: &str,
        valuation: f64,
        scan_time: i64,
    ) -> Result<bool, LedgerError> {
        validate_scan(token_key, room_key, valuation)?;

        let key = record_key(token_key, room_key);
        if self.cache.contains_key(&key) {
            return Ok(false);
        }

        let record = ScanRecord {
            token_key: token_key.to_string(),
            room_key: room_key.to_string(),
            first_scanner: scanner_id.to_string(),
            first_valuation: valuation,
            scan_time,
        };
        let row = record.clone();

        let inserted = self
            .run_blocking("record_if_absent", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    INSERT_SCAN,
                    params![
                        row.token_key,
                        row.room_key,
                        row.first_scanner,
                        row.first_valuation,
                        row.scan_time
                    ],
                )?;
                tx.commit()?;
                Ok(changed == 1)
            })
            .await?;

        if inserted {
            debug!(
                token = token_key,
                room = room_key,
                scanner = scanner_id,
                "Recorded first scan"
            );
            self.cache.insert(key, record).await;
        }
        Ok(inserted)
    }

    async fn lookup(
        &self,
        token_key: &str,
        room_key: &str,
    ) -> Result<Option<ScanRecord>, LedgerError> {
        let key = record_key(token_key, room_key);
        if let Some(record) = self.cache.get(&key).await {
            return Ok(Some(record));
        }

        let (token, room) = key.clone();
        let found = self
            .run_blocking("lookup", move |conn| {
                conn.query_row(SELECT_SCAN, params![token, room], row_to_record)
                    .optional()
                    .map_err(LedgerError::from)
            })
            .await?;

        // Only hits are cached; a miss may be filled by another caller.
        if let Some(record) = &found {
            self.cache.insert(key, record.clone()).await;
        }
        Ok(found)
    }
}

#[async_trait]
impl PriceHistory for SqliteLedger {
    async fn append_sample(
        &self,
        token_key: &str,
        price: f64,
        valuation: f64,
        sample_time: i64,
    ) -> Result<bool, LedgerError> {
        if token_key.trim().is_empty() {
            return Err(LedgerError::InvalidRecord("token key is empty".into()));
        }
        validate_amount("price", price)?;
        validate_amount("valuation", valuation)?;

        let token = token_key.to_string();
        self.run_blocking("append_sample", move |conn| {
            let changed = conn.execute(INSERT_SAMPLE, params![token, price, valuation, sample_time])?;
            Ok(changed == 1)
        })
        .await
    }

    async fn recent_samples(
        &self,
        token_key: &str,
        limit: usize,
    ) -> Result<Vec<PriceSample>, LedgerError> {
        let token = token_key.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run_blocking("recent_samples", move |conn| {
            let mut stmt = conn.prepare(SELECT_SAMPLES)?;
            let samples = stmt
                .query_map(params![token, limit], row_to_sample)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(samples)
        })
        .await
    }
}

#[async_trait]
impl Closeable for SqliteLedger {
    fn name(&self) -> &str {
        "scan-ledger"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.cache.invalidate_all();
        self.run_blocking("checkpoint", |conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await?;
        info!("Scan ledger at {} checkpointed", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteLedger) {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = LedgerSettings {
            database_path: dir.path().join("scans.db").to_string_lossy().into_owned(),
            ..LedgerSettings::default()
        };
        let ledger = SqliteLedger::open(&settings).expect("open ledger");
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_cached_record_short_circuits_second_insert() {
        let (_dir, ledger) = open_temp();
        assert!(ledger
            .record_if_absent("T1", "R1", "U1", 5_000.0, 100)
            .await
            .expect("first insert"));
        assert!(ledger.cache.contains_key(&record_key("T1", "R1")));
        assert!(!ledger
            .record_if_absent("T1", "R1", "U2", 8_000.0, 200)
            .await
            .expect("second insert"));
    }

    #[tokio::test]
    async fn test_lookup_miss_is_not_cached() {
        let (_dir, ledger) = open_temp();
        assert_eq!(ledger.lookup("T9", "R1").await.expect("lookup"), None);
        assert!(!ledger.cache.contains_key(&record_key("T9", "R1")));
    }

    #[tokio::test]
    async fn test_nested_database_directory_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("data").join("ledger").join("scans.db");
        let settings = LedgerSettings {
            database_path: nested.to_string_lossy().into_owned(),
            ..LedgerSettings::default()
        };
        let ledger = SqliteLedger::open(&settings).expect("open ledger");
        assert_eq!(ledger.path(), nested.as_path());
        assert_eq!(ledger.scan_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_close_checkpoints_and_clears_cache() {
        let (_dir, ledger) = open_temp();
        ledger
            .record_if_absent("T1", "R1", "U1", 1.0, 1)
            .await
            .expect("insert");
        ledger.close().await.expect("close");
        assert!(!ledger.cache.contains_key(&record_key("T1", "R1")));
        // Still usable; the record comes back from disk.
        let record = ledger.lookup("T1", "R1").await.expect("lookup");
        assert_eq!(record.map(|r| r.first_scanner), Some("U1".to_string()));
    }
}
