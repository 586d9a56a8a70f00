//! Line-oriented scan dispatcher
//!
//! Reads scan events, one per line, in the form
//! `<room> <user> <token> [valuation] [price]` and writes one response per
//! event. Every event is handled in its own task so a slow ledger call never
//! holds up the next message, and each response is flushed as soon as its
//! scan finishes.

use crate::scan::{Quote, ScanRequest, ScanService};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors raised while parsing a scan event line
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventParseError {
    /// A required field was absent
    #[error("missing {0}")]
    MissingField(&'static str),
}

/// One scan trigger as delivered by the chat layer
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    /// Identifiers of the scan
    pub request: ScanRequest,
    /// Valuation reported by the price service, if any
    pub valuation: Option<f64>,
    /// Unit price reported by the price service, if any
    pub price: Option<f64>,
}

impl ScanEvent {
    /// Quote for this event; a missing valuation counts as zero.
    #[must_use]
    pub fn quote(&self) -> Quote {
        Quote {
            valuation: self.valuation.unwrap_or(0.0),
            price: self.price,
        }
    }
}

/// Parse one input line.
///
/// Blank lines and `#` comments yield `Ok(None)`. Unparsable numbers are
/// treated as absent.
///
/// # Errors
///
/// Returns `EventParseError::MissingField` when room, user or token is absent.
pub fn parse_event(line: &str) -> Result<Option<ScanEvent>, EventParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let room = fields.next().ok_or(EventParseError::MissingField("room"))?;
    let user = fields.next().ok_or(EventParseError::MissingField("user"))?;
    let token = fields.next().ok_or(EventParseError::MissingField("token"))?;
    let valuation = fields.next().and_then(|v| v.parse::<f64>().ok());
    let price = fields.next().and_then(|v| v.parse::<f64>().ok());

    Ok(Some(ScanEvent {
        request: ScanRequest::new(token, room, user),
        valuation,
        price,
    }))
}

/// Dispatch events from `input` until EOF or cancellation, then wait for
/// in-flight scans to finish.
///
/// Returns the number of responses written.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn run_dispatcher<R, W>(
    service: Arc<ScanService>,
    input: R,
    mut output: W,
    cancel: CancellationToken,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut in_flight: JoinSet<String> = JoinSet::new();
    let mut handled = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Dispatcher cancelled, draining {} in-flight scans", in_flight.len());
                break;
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                handled += write_response(&mut output, done).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                spawn_scan(&mut in_flight, &service, &line);
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        handled += write_response(&mut output, done).await?;
    }
    output.flush().await?;
    Ok(handled)
}

fn spawn_scan(in_flight: &mut JoinSet<String>, service: &Arc<ScanService>, line: &str) {
    match parse_event(line) {
        Ok(Some(event)) => {
            if event.valuation.is_none() {
                warn!(
                    token = %event.request.token_key,
                    "No valuation in scan event, treating price data as unavailable"
                );
            }
            let service = service.clone();
            in_flight.spawn(async move {
                let quote = event.quote();
                service.scan(event.request, quote, Utc::now()).await.render()
            });
        }
        Ok(None) => {}
        Err(e) => warn!("Skipping malformed scan event {:?}: {}", line, e),
    }
}

async fn write_response<W>(output: &mut W, done: Result<String, JoinError>) -> anyhow::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    match done {
        Ok(text) => {
            output.write_all(text.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
            Ok(1)
        }
        Err(e) => {
            error!("Scan task failed: {}", e);
            Ok(0)
        }
    }
}
