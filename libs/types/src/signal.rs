//! Trading signal types
//!
//! Signal events are emitted by the upstream analysis backend over the
//! `/ws/signals` stream. Strong buy/sell notifications are the only
//! payloads the retention layer treats as critical under overload.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::SymbolId;

/// Signal strength classification from the upstream forecaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalCategory {
    #[serde(rename = "strong buy")]
    StrongBuy,
    #[serde(rename = "weak buy")]
    WeakBuy,
    #[serde(rename = "hold")]
    Hold,
    #[serde(rename = "weak sell")]
    WeakSell,
    #[serde(rename = "strong sell")]
    StrongSell,
}

impl SignalCategory {
    /// Whether this is a strong (actionable) signal.
    ///
    /// Strong signals are preferentially retained when the inbound
    /// queue prunes under overload.
    pub fn is_strong(&self) -> bool {
        matches!(self, SignalCategory::StrongBuy | SignalCategory::StrongSell)
    }

    /// Label as emitted on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::StrongBuy => "strong buy",
            SignalCategory::WeakBuy => "weak buy",
            SignalCategory::Hold => "hold",
            SignalCategory::WeakSell => "weak sell",
            SignalCategory::StrongSell => "strong sell",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A signal event from the upstream forecaster.
///
/// `indicators` is an opaque snapshot of whatever indicator values the
/// backend attached; the engine forwards it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub symbol: SymbolId,
    /// Unix milliseconds
    pub timestamp: i64,
    pub price: Decimal,
    pub category: SignalCategory,
    pub forecast_pct: Decimal,
    /// Forecast confidence in [0, 1]
    pub confidence: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<serde_json::Value>,
}
