use anyhow::Context;
use dotenvy::dotenv;
use memewatch::config::LedgerSettings;
use memewatch::dispatch::run_dispatcher;
use memewatch::ledger::SqliteLedger;
use memewatch::lifecycle::ShutdownRegistry;
use memewatch::logging::{RedactingMakeWriter, RedactionPatterns};
use memewatch::scan::ScanService;
use std::io;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting memewatch scan dispatcher...");

    let settings = LedgerSettings::new().context("Failed to load ledger configuration")?;

    let ledger = Arc::new(
        SqliteLedger::open_with_retry(&settings)
            .await
            .with_context(|| format!("Failed to open scan ledger at {}", settings.database_path))?,
    );
    match ledger.scan_count().await {
        Ok(count) => info!("Scan ledger ready with {} first-scan records.", count),
        Err(e) => warn!("Scan ledger opened but could not be counted: {}", e),
    }

    let mut shutdown = ShutdownRegistry::new();
    shutdown.register(ledger.clone());

    let service = Arc::new(ScanService::new(ledger.clone()).with_history(ledger));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing in-flight scans...");
            ctrl_c.cancel();
        }
    });

    info!("Reading scan events from stdin...");
    let handled = run_dispatcher(
        service,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cancel,
    )
    .await?;
    info!("Dispatcher stopped after {} scans.", handled);

    let failures = shutdown.close_all().await;
    if failures > 0 {
        warn!("{} resources failed to close cleanly.", failures);
    }
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("memewatch=info,r2d2=warn,tokio=warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
