//! Scan handling on top of the ledger
//!
//! Turns a scan request plus the current quote into a report with an
//! optional provenance trailer. Ledger faults never fail a scan; the trailer
//! is simply left out.

use crate::ledger::{LedgerError, PriceHistory, ScanLedger, ScanRecord};
use crate::trend::{change_percent, Trend};
use crate::utils::{format_number, format_percentage, format_price, format_time_ago};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Who scanned what, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Contract address or canonical symbol
    pub token_key: String,
    /// Chat room or guild identifier
    pub room_key: String,
    /// User who triggered the scan
    pub scanner_id: String,
}

impl ScanRequest {
    /// Build a request from the three identifiers delivered by the chat layer
    pub fn new(
        token_key: impl Into<String>,
        room_key: impl Into<String>,
        scanner_id: impl Into<String>,
    ) -> Self {
        Self {
            token_key: token_key.into(),
            room_key: room_key.into(),
            scanner_id: scanner_id.into(),
        }
    }
}

/// Current market data for the scanned token, as far as it is known
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quote {
    /// Market cap in USD; zero when the price service had nothing
    pub valuation: f64,
    /// Unit price in USD, if the price service returned one
    pub price: Option<f64>,
}

impl Quote {
    /// Quote with a valuation only
    #[must_use]
    pub const fn valuation(valuation: f64) -> Self {
        Self {
            valuation,
            price: None,
        }
    }

    /// Quote with both valuation and unit price
    #[must_use]
    pub const fn with_price(valuation: f64, price: f64) -> Self {
        Self {
            valuation,
            price: Some(price),
        }
    }
}

/// What the ledger says about this token in this room
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    /// This scan created the first-scan record
    FirstScan,
    /// Someone scanned it earlier
    SeenBefore {
        /// The stored first-scan record
        record: ScanRecord,
        /// Current valuation against the first one
        trend: Trend,
        /// Percentage change, `None` if the first valuation was zero
        change_pct: Option<f64>,
    },
    /// The ledger could not be consulted
    Unknown,
}

/// Outcome of one scan, ready to be rendered into a chat message
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// The originating request
    pub request: ScanRequest,
    /// Quote used for this scan, after sanitizing
    pub quote: Quote,
    /// When the scan happened
    pub scanned_at: DateTime<Utc>,
    /// Ledger verdict
    pub provenance: Provenance,
}

impl ScanReport {
    /// Provenance line appended to the scan response, if any.
    #[must_use]
    pub fn trailer(&self) -> Option<String> {
        match &self.provenance {
            Provenance::FirstScan => Some(format!(
                "🥇 First scan! {} called it at {} mcap",
                self.request.scanner_id,
                format_number(self.quote.valuation)
            )),
            Provenance::SeenBefore {
                record,
                trend,
                change_pct,
            } => {
                let mut line = format!("{} {}", trend.emoji(), capitalize(trend.label()));
                if let Some(pct) = change_pct {
                    line.push(' ');
                    line.push_str(&format_percentage(*pct));
                }
                line.push_str(&format!(
                    " since first scan by {} at {} mcap",
                    record.first_scanner,
                    format_number(record.first_valuation)
                ));
                if record.scan_time > 0 {
                    line.push_str(&format!(
                        " ({} ago)",
                        format_time_ago(record.scan_time, self.scanned_at)
                    ));
                }
                Some(line)
            }
            Provenance::Unknown => None,
        }
    }

    /// Full response text: the scan line plus the trailer when available.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = format!(
            "🔎 {} · mcap {}",
            self.request.token_key,
            format_number(self.quote.valuation)
        );
        if let Some(price) = self.quote.price {
            text.push_str(&format!(" · price {}", format_price(price)));
        }
        if let Some(trailer) = self.trailer() {
            text.push('\n');
            text.push_str(&trailer);
        }
        text
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Applies the first-scan policy for every incoming scan.
///
/// Built once at start-up and shared by handle with the dispatcher.
pub struct ScanService {
    ledger: Arc<dyn ScanLedger>,
    history: Option<Arc<dyn PriceHistory>>,
}

impl ScanService {
    /// Create a service backed by `ledger`
    #[must_use]
    pub fn new(ledger: Arc<dyn ScanLedger>) -> Self {
        Self {
            ledger,
            history: None,
        }
    }

    /// Also append a price sample for every scan that carries a price
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn PriceHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Handle one scan. Never fails: ledger trouble yields
    /// [`Provenance::Unknown`].
    pub async fn scan(&self, request: ScanRequest, quote: Quote, at: DateTime<Utc>) -> ScanReport {
        let quote = sanitize_quote(&request, quote);
        let provenance = match self.resolve(&request, quote.valuation, at.timestamp()).await {
            Ok(provenance) => provenance,
            Err(e) if e.is_persistence() => {
                warn!(
                    token = %request.token_key,
                    room = %request.room_key,
                    "Scan ledger unavailable, answering without provenance: {}",
                    e
                );
                Provenance::Unknown
            }
            Err(e) => {
                error!(
                    token = %request.token_key,
                    room = %request.room_key,
                    "Scan rejected by ledger: {}",
                    e
                );
                Provenance::Unknown
            }
        };

        if let (Some(history), Some(price)) = (&self.history, quote.price) {
            if let Err(e) = history
                .append_sample(&request.token_key, price, quote.valuation, at.timestamp())
                .await
            {
                warn!(token = %request.token_key, "Failed to append price sample: {}", e);
            }
        }

        ScanReport {
            request,
            quote,
            scanned_at: at,
            provenance,
        }
    }

    async fn resolve(
        &self,
        request: &ScanRequest,
        valuation: f64,
        now: i64,
    ) -> Result<Provenance, LedgerError> {
        let ScanRequest {
            token_key,
            room_key,
            scanner_id,
        } = request;

        if let Some(record) = self.ledger.lookup(token_key, room_key).await? {
            return Ok(seen_before(record, valuation));
        }

        if self
            .ledger
            .record_if_absent(token_key, room_key, scanner_id, valuation, now)
            .await?
        {
            debug!(token = %token_key, room = %room_key, "First scan by {}", scanner_id);
            return Ok(Provenance::FirstScan);
        }

        // Lost the race to a concurrent scan; report the winner.
        match self.ledger.lookup(token_key, room_key).await? {
            Some(record) => Ok(seen_before(record, valuation)),
            None => Ok(Provenance::Unknown),
        }
    }
}

fn seen_before(record: ScanRecord, valuation: f64) -> Provenance {
    let trend = Trend::between(record.first_valuation, valuation);
    let change_pct = change_percent(record.first_valuation, valuation);
    Provenance::SeenBefore {
        record,
        trend,
        change_pct,
    }
}

/// Price services sometimes return garbage; treat it as "no data".
fn sanitize_quote(request: &ScanRequest, quote: Quote) -> Quote {
    let valuation = if quote.valuation.is_finite() && quote.valuation >= 0.0 {
        quote.valuation
    } else {
        warn!(
            token = %request.token_key,
            "Discarding unusable valuation {}, using 0",
            quote.valuation
        );
        0.0
    };
    let price = quote.price.filter(|p| p.is_finite() && *p >= 0.0);
    Quote { valuation, price }
}
