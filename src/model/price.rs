use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale for [`Price`] — six decimal digits of precision.
///
/// A declared fixed-point representation, not `f64`, so that two
/// independent nodes fed the same block stream always compute the same
/// fills (see design notes on floating-point determinism hazards).
pub const PRICE_SCALE: u128 = 1_000_000;

/// Quote-per-trade conversion ratio, stored as `actual_price * PRICE_SCALE`.
///
/// Interpreted as "base units per one quote unit": `quote_to_base`
/// multiplies, `base_to_quote` divides. This is the interpretation that
/// keeps the convertibility formulas dimensionally consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(u64);

impl Price {
    /// Construct from a raw scaled integer (`actual_price * PRICE_SCALE`).
    /// Returns `None` for zero (price must be positive).
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Price(raw)) }
    }

    /// Construct from a finite, positive `f64`, e.g. parsed from a memo field.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        let raw = (value * PRICE_SCALE as f64).round();
        if raw <= 0.0 || raw > u64::MAX as f64 {
            return None;
        }
        Self::from_raw(raw as u64)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / PRICE_SCALE as f64
    }

    /// Convert a quote-side amount into its base-side equivalent, floored.
    pub fn quote_to_base(&self, quote_amount: u64) -> u64 {
        ((quote_amount as u128 * self.0 as u128) / PRICE_SCALE) as u64
    }

    /// Convert a base-side amount into its quote-side equivalent, floored.
    pub fn base_to_quote(&self, base_amount: u64) -> u64 {
        ((base_amount as u128 * PRICE_SCALE) / self.0 as u128) as u64
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}
