//! Pumped/dipped classification against the first-scan valuation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a valuation relative to its first scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Current valuation is strictly above the first one
    Pumped,
    /// Current valuation is at or below the first one
    Dipped,
}

impl Trend {
    /// Classify `current_valuation` against `first_valuation`.
    ///
    /// An unchanged valuation reports `Dipped`. There is no "flat" outcome;
    /// the tie is suspect but callers rely on it.
    #[must_use]
    pub fn between(first_valuation: f64, current_valuation: f64) -> Self {
        if current_valuation > first_valuation {
            Self::Pumped
        } else {
            Self::Dipped
        }
    }

    /// Lowercase label used in messages
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pumped => "pumped",
            Self::Dipped => "dipped",
        }
    }

    /// Emoji prefix used in messages
    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Pumped => "📈",
            Self::Dipped => "📉",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Percentage change from `first_valuation`, `None` when the first valuation
/// was zero (price data was missing at first scan).
#[must_use]
pub fn change_percent(first_valuation: f64, current_valuation: f64) -> Option<f64> {
    if first_valuation > 0.0 {
        Some((current_valuation - first_valuation) * 100.0 / first_valuation)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trend_examples() {
        assert_eq!(Trend::between(1000.0, 1500.0), Trend::Pumped);
        assert_eq!(Trend::between(1000.0, 500.0), Trend::Dipped);
    }

    // Debatable, but fixed: an unchanged valuation counts as a dip.
    #[test]
    fn test_equal_valuation_reports_dipped() {
        assert_eq!(Trend::between(1000.0, 1000.0), Trend::Dipped);
        assert_eq!(Trend::between(0.0, 0.0), Trend::Dipped);
    }

    #[test]
    fn test_change_percent() {
        assert_eq!(change_percent(5000.0, 8000.0), Some(60.0));
        assert_eq!(change_percent(1000.0, 500.0), Some(-50.0));
        assert_eq!(change_percent(0.0, 500.0), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Trend::Pumped.to_string(), "pumped");
        assert_eq!(Trend::Dipped.to_string(), "dipped");
    }

    proptest! {
        #[test]
        fn prop_pumped_iff_strictly_greater(first in 0.0f64..1e12, current in 0.0f64..1e12) {
            let trend = Trend::between(first, current);
            prop_assert_eq!(trend == Trend::Pumped, current > first);
        }

        #[test]
        fn prop_change_sign_matches_trend(first in 1.0f64..1e12, current in 0.0f64..1e12) {
            let pct = change_percent(first, current);
            prop_assert!(pct.is_some());
            if let Some(pct) = pct {
                if Trend::between(first, current) == Trend::Pumped {
                    prop_assert!(pct > 0.0);
                } else {
                    prop_assert!(pct <= 0.0);
                }
            }
        }
    }
}
