//! Formatting helpers for scan messages
//!
//! Compact number, price, percentage and relative-time rendering.

use chrono::{DateTime, Utc};

/// Timestamps above this are taken to be in milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Format a large number with a T/B/M/K suffix and two decimals.
///
/// # Examples
///
/// ```
/// use memewatch::utils::format_number;
/// assert_eq!(format_number(5_000.0), "5.00K");
/// assert_eq!(format_number(1_250_000.0), "1.25M");
/// assert_eq!(format_number(12.0), "12.00");
/// ```
#[must_use]
pub fn format_number(num: f64) -> String {
    if !num.is_finite() {
        return "0.00".to_string();
    }
    if num >= 1e12 {
        format!("{:.2}T", num / 1e12)
    } else if num >= 1e9 {
        format!("{:.2}B", num / 1e9)
    } else if num >= 1e6 {
        format!("{:.2}M", num / 1e6)
    } else if num >= 1e3 {
        format!("{:.2}K", num / 1e3)
    } else {
        format!("{num:.2}")
    }
}

/// Format a unit price, with more decimals the smaller it is.
///
/// # Examples
///
/// ```
/// use memewatch::utils::format_price;
/// assert_eq!(format_price(0.00001234), "$0.0000123400");
/// assert_eq!(format_price(1.5), "$1.50");
/// ```
#[must_use]
pub fn format_price(price: f64) -> String {
    if !price.is_finite() {
        return "$0.00".to_string();
    }
    if price < 0.0001 {
        format!("${price:.10}")
    } else if price < 0.01 {
        format!("${price:.6}")
    } else if price < 1.0 {
        format!("${price:.4}")
    } else {
        format!("${price:.2}")
    }
}

/// Format a percentage with one decimal, prefixing gains with `+`.
#[must_use]
pub fn format_percentage(value: f64) -> String {
    if !value.is_finite() {
        return "0.0%".to_string();
    }
    if value > 0.0 {
        format!("+{value:.1}%")
    } else {
        format!("{value:.1}%")
    }
}

/// Render how long ago `timestamp` was relative to `now`, e.g. `3d` or `5m`.
///
/// Accepts seconds or milliseconds since the epoch. Returns `Unknown` for a
/// zero timestamp.
#[must_use]
pub fn format_time_ago(timestamp: i64, now: DateTime<Utc>) -> String {
    if timestamp == 0 {
        return "Unknown".to_string();
    }
    let secs = if timestamp > MILLIS_THRESHOLD {
        timestamp / 1000
    } else {
        timestamp
    };

    let elapsed = (now.timestamp() - secs).max(0);
    let days = elapsed / 86_400;

    if days > 365 {
        format!("{}y", days / 365)
    } else if days > 30 {
        format!("{}mo", days / 30)
    } else if days > 0 {
        format!("{days}d")
    } else if elapsed >= 3_600 {
        format!("{}h", elapsed / 3_600)
    } else if elapsed >= 60 {
        format!("{}m", elapsed / 60)
    } else {
        format!("{elapsed}s")
    }
}
