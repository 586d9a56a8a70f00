//! Append-only price samples per token.

use super::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One observed price/valuation pair for a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Contract address or canonical symbol
    pub token_key: String,
    /// Unit price in USD
    pub price: f64,
    /// Valuation (market cap) in USD
    pub valuation: f64,
    /// Seconds since the Unix epoch (UTC)
    pub sample_time: i64,
}

/// Interface for price history stores
#[async_trait]
pub trait PriceHistory: Send + Sync {
    /// Append a sample. Returns `false` if a sample already exists for the
    /// token at that second; the earlier sample is kept.
    async fn append_sample(
        &self,
        token_key: &str,
        price: f64,
        valuation: f64,
        sample_time: i64,
    ) -> Result<bool, LedgerError>;

    /// Most recent samples for a token, newest first.
    async fn recent_samples(
        &self,
        token_key: &str,
        limit: usize,
    ) -> Result<Vec<PriceSample>, LedgerError>;
}
