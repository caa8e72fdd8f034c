//! Market data types: timeframes and OHLCV samples
//!
//! Uses `Decimal` for all price and volume arithmetic so that a given
//! input series always reproduces bit-identical indicator output.
//!
//! Upstream feeds are sloppy about numeric encoding: OHLCV fields may
//! arrive as JSON numbers or as quoted strings. `Decimal`'s serde impl
//! accepts both, so no separate coercion layer is needed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported chart timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    #[serde(rename = "1m")]
    M1,
    /// 5 minutes
    #[serde(rename = "5m")]
    M5,
    /// 15 minutes
    #[serde(rename = "15m")]
    M15,
    /// 30 minutes
    #[serde(rename = "30m")]
    M30,
    /// 1 hour
    #[serde(rename = "1h")]
    H1,
    /// 4 hours
    #[serde(rename = "4h")]
    H4,
    /// 1 day
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Interval label used in stream paths and REST queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Parse an interval label.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    /// Duration of this timeframe in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::M30 => 30 * 60_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 4 * 3_600_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    /// All standard timeframes.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV observation.
///
/// `time` is the candle open time in Unix milliseconds. Within a series,
/// samples are ascending by time and unique by time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

impl Sample {
    /// Validate OHLCV integrity invariants.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }
}

/// Normalize a raw series into the canonical form: ascending by time,
/// unique by time (the later-arriving sample wins a duplicate slot).
///
/// The upstream feed makes no exactly-once promise, so duplicates and
/// out-of-order delivery are expected inputs, not errors.
pub fn normalize_series(mut samples: Vec<Sample>) -> Vec<Sample> {
    // Stable sort keeps arrival order within a duplicate timestamp,
    // so the last-arrived sample survives the dedup below.
    samples.sort_by_key(|s| s.time);

    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for sample in samples {
        match out.last_mut() {
            Some(last) if last.time == sample.time => *last = sample,
            _ => out.push(sample),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::FromPrimitive;

    fn sample(time: i64, close: i64) -> Sample {
        let px = Decimal::from(close);
        Sample {
            time,
            open: px,
            high: px,
            low: px,
            close: px,
            volume: Decimal::ONE,
        }
    }

    #[test]
    fn test_timeframe_roundtrip() {
        for &tf in Timeframe::all() {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse("7m"), None);
    }

    #[test]
    fn test_timeframe_duration() {
        assert_eq!(Timeframe::M1.duration_ms(), 60_000);
        assert_eq!(Timeframe::H1.duration_ms(), 3_600_000);
        assert_eq!(Timeframe::D1.duration_ms(), 86_400_000);
    }

    #[test]
    fn test_sample_accepts_string_numerics() {
        // Upstream klines frequently quote numeric fields
        let json = r#"{"time":1700000000000,"open":"100.5","high":101,"low":"99.75","close":100,"volume":"12.5"}"#;
        let s: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(s.open, Decimal::from_f64(100.5).unwrap());
        assert_eq!(s.high, Decimal::from(101));
        assert_eq!(s.volume, Decimal::from_f64(12.5).unwrap());
        assert!(s.is_valid());
    }

    #[test]
    fn test_sample_validity() {
        let mut s = sample(0, 100);
        assert!(s.is_valid());
        s.high = Decimal::from(90); // high below close
        assert!(!s.is_valid());
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let series = vec![sample(3, 30), sample(1, 10), sample(2, 20), sample(1, 11)];
        let normalized = normalize_series(series);

        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[0].time, 1);
        // Later arrival wins the duplicate slot
        assert_eq!(normalized[0].close, Decimal::from(11));
        assert_eq!(normalized[1].time, 2);
        assert_eq!(normalized[2].time, 3);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_series(Vec::new()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_normalize_is_strictly_ascending(times in prop::collection::vec(0i64..1000, 0..100)) {
            let series: Vec<Sample> = times.iter().map(|&t| sample(t, t)).collect();
            let normalized = normalize_series(series);
            for pair in normalized.windows(2) {
                prop_assert!(pair[0].time < pair[1].time);
            }
        }
    }
}
