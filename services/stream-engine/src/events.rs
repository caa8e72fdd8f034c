//! Wire message model for the inbound stream
//!
//! The upstream feed multiplexes several JSON shapes over one socket per
//! channel: liveness traffic, signal events, and OHLCV klines. Depth and
//! trade payloads pass through opaquely for the rendering consumer.
//!
//! Parsing never aborts the connection: a malformed frame is dropped and
//! counted, everything else keeps flowing.

use serde::{Deserialize, Serialize};
use std::fmt;

use types::ids::SymbolId;
use types::market::{Sample, Timeframe};
use types::signal::SignalEvent;

use crate::compute::IndicatorBundle;
use crate::indicators::{RenderCandle, VolumePoint};

/// Logical stream families served by the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Kline,
    Depth,
    Trades,
    Signals,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Kline => "kline",
            StreamKind::Depth => "depth",
            StreamKind::Trades => "trades",
            StreamKind::Signals => "signals",
        }
    }

    /// Endpoint path for this stream.
    ///
    /// Symbol-scoped streams encode the symbol in the path; the signals
    /// stream is shared and expects a subscribe message after the
    /// handshake instead.
    pub fn path(&self, symbol: &SymbolId) -> String {
        match self {
            StreamKind::Signals => "/ws/signals".to_string(),
            _ => format!("/ws/{}/{}", self.as_str(), symbol),
        }
    }

    /// Whether this stream requires a subscribe message after open.
    pub fn requires_subscribe(&self) -> bool {
        matches!(self, StreamKind::Signals)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one logical channel: stream family + symbol + timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub kind: StreamKind,
    pub symbol: SymbolId,
    /// Set for kline channels; other streams are not timeframe-scoped.
    pub timeframe: Option<Timeframe>,
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeframe {
            Some(tf) => write!(f, "{}@{}@{}", self.kind, self.symbol, tf),
            None => write!(f, "{}@{}", self.kind, self.symbol),
        }
    }
}

/// Liveness frame kinds. Never forwarded to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessKind {
    Ping,
    Pong,
    Heartbeat,
}

/// A liveness frame: `{"type": "ping", "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liveness {
    #[serde(rename = "type")]
    pub kind: LivenessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A parsed inbound frame.
///
/// Variant order matters: serde tries them top to bottom, and the
/// earlier shapes all carry required fields the later ones lack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// Ping/pong/heartbeat traffic.
    Liveness(Liveness),
    /// A forecaster signal event (has `category`).
    Signal(SignalEvent),
    /// An OHLCV kline update (has `open`/`high`/`low`/`close`).
    Kline(Sample),
    /// Depth snapshots, trade ticks, and anything else the rendering
    /// consumer interprets directly.
    Opaque(serde_json::Value),
}

/// Retention priority of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    /// Strong buy/sell notifications. Preferentially retained.
    Critical,
    /// Price ticks, depth snapshots, weak signals.
    Normal,
}

impl StreamMessage {
    /// Retention priority of this frame.
    pub fn priority(&self) -> PriorityClass {
        match self {
            StreamMessage::Signal(event) if event.category.is_strong() => {
                PriorityClass::Critical
            }
            _ => PriorityClass::Normal,
        }
    }

    /// Whether this is liveness traffic (consumed by the connection
    /// layer, never queued).
    pub fn is_liveness(&self) -> bool {
        matches!(self, StreamMessage::Liveness(_))
    }

    /// Frame type label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            StreamMessage::Liveness(_) => "liveness",
            StreamMessage::Signal(_) => "signal",
            StreamMessage::Kline(_) => "kline",
            StreamMessage::Opaque(_) => "opaque",
        }
    }
}

/// Parse failure for a single inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse one raw text frame.
pub fn parse_stream_message(raw: &str) -> Result<StreamMessage, ParseError> {
    Ok(serde_json::from_str(raw)?)
}

/// Subscribe payload sent after the signals handshake.
pub fn subscribe_payload(symbol: &SymbolId) -> String {
    serde_json::json!({ "subscribe": symbol.as_str() }).to_string()
}

/// Liveness probe sent when the connection has gone idle.
pub fn ping_payload() -> String {
    serde_json::json!({ "type": "ping" }).to_string()
}

/// Acknowledgment for a server-initiated ping/heartbeat.
pub fn pong_payload(timestamp_secs: i64) -> String {
    serde_json::json!({ "type": "pong", "timestamp": timestamp_secs }).to_string()
}

/// Why a channel reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Server closed with a code in the fatal set (1008/1011).
    FatalClose { code: u16 },
    /// The reconnect budget is exhausted.
    MaxRetriesExceeded,
    /// The consumer unsubscribed.
    ClosedByConsumer,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::FatalClose { code } => {
                write!(f, "fatal close (code {})", code)
            }
            TerminationReason::MaxRetriesExceeded => {
                write!(f, "max reconnection attempts reached")
            }
            TerminationReason::ClosedByConsumer => write!(f, "closed by consumer"),
        }
    }
}

/// Out-of-band condition surfaced to the consumer layer.
///
/// Only terminal conditions cross this boundary; everything recoverable
/// is absorbed where it occurs.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice {
    ChannelTerminated {
        channel: ChannelRef,
        reason: TerminationReason,
    },
}

/// Everything the engine hands to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// A forecaster signal, forwarded as-is.
    Signal(SignalEvent),
    /// Render-ready candles for a kline channel.
    Candles {
        channel: ChannelRef,
        candles: Vec<RenderCandle>,
    },
    /// Render-ready volume bars for a kline channel.
    Volume {
        channel: ChannelRef,
        bars: Vec<VolumePoint>,
    },
    /// Derived indicator series for a kline channel.
    Indicators {
        channel: ChannelRef,
        bundle: IndicatorBundle,
    },
    /// Opaque payload (depth, trades) for the rendering consumer.
    Raw {
        channel: ChannelRef,
        payload: serde_json::Value,
    },
    /// The result cache was cleared.
    CacheCleared,
    /// Terminal channel condition.
    Notice(StreamNotice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::signal::SignalCategory;

    #[test]
    fn test_parse_liveness() {
        let msg = parse_stream_message(r#"{"type":"ping","timestamp":1700000000}"#).unwrap();
        assert!(msg.is_liveness());
        assert_eq!(msg.priority(), PriorityClass::Normal);

        let msg = parse_stream_message(r#"{"type":"heartbeat","timestamp":1700000000}"#).unwrap();
        match msg {
            StreamMessage::Liveness(l) => assert_eq!(l.kind, LivenessKind::Heartbeat),
            other => panic!("expected liveness, got {}", other.label()),
        }
    }

    #[test]
    fn test_parse_signal_is_critical_when_strong() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "timestamp": 1700000000000,
            "price": "50000",
            "category": "strong sell",
            "forecast_pct": -3.2,
            "confidence": 0.91
        }"#;
        let msg = parse_stream_message(raw).unwrap();
        assert_eq!(msg.priority(), PriorityClass::Critical);
        match msg {
            StreamMessage::Signal(e) => assert_eq!(e.category, SignalCategory::StrongSell),
            other => panic!("expected signal, got {}", other.label()),
        }
    }

    #[test]
    fn test_parse_weak_signal_is_normal() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "timestamp": 1700000000000,
            "price": 50000,
            "category": "weak buy",
            "forecast_pct": 0.4,
            "confidence": 0.55
        }"#;
        let msg = parse_stream_message(raw).unwrap();
        assert_eq!(msg.priority(), PriorityClass::Normal);
    }

    #[test]
    fn test_parse_kline_with_string_numerics() {
        let raw = r#"{"time":1700000000000,"open":"100","high":"105","low":"99","close":"104","volume":"12.5"}"#;
        let msg = parse_stream_message(raw).unwrap();
        assert_eq!(msg.priority(), PriorityClass::Normal);
        match msg {
            StreamMessage::Kline(s) => assert_eq!(s.close, Decimal::from(104)),
            other => panic!("expected kline, got {}", other.label()),
        }
    }

    #[test]
    fn test_parse_opaque_depth() {
        let raw = r#"{"bids":[["100","2"]],"asks":[["101","1"]]}"#;
        let msg = parse_stream_message(raw).unwrap();
        assert_eq!(msg.label(), "opaque");
        assert_eq!(msg.priority(), PriorityClass::Normal);
    }

    #[test]
    fn test_parse_malformed_frame() {
        assert!(parse_stream_message("{not json").is_err());
    }

    #[test]
    fn test_stream_paths() {
        let symbol = SymbolId::new("BTCUSDT");
        assert_eq!(StreamKind::Kline.path(&symbol), "/ws/kline/BTCUSDT");
        assert_eq!(StreamKind::Depth.path(&symbol), "/ws/depth/BTCUSDT");
        assert_eq!(StreamKind::Signals.path(&symbol), "/ws/signals");
        assert!(StreamKind::Signals.requires_subscribe());
        assert!(!StreamKind::Kline.requires_subscribe());
    }

    #[test]
    fn test_control_payloads() {
        let symbol = SymbolId::new("ETHUSDT");
        assert_eq!(subscribe_payload(&symbol), r#"{"subscribe":"ETHUSDT"}"#);
        assert_eq!(ping_payload(), r#"{"type":"ping"}"#);

        let pong: Liveness = serde_json::from_str(&pong_payload(1700000000)).unwrap();
        assert_eq!(pong.kind, LivenessKind::Pong);
        assert_eq!(pong.timestamp, Some(1700000000));
    }

    #[test]
    fn test_channel_ref_display() {
        let channel = ChannelRef {
            kind: StreamKind::Kline,
            symbol: SymbolId::new("BTCUSDT"),
            timeframe: Some(Timeframe::H1),
        };
        assert_eq!(channel.to_string(), "kline@BTCUSDT@1h");
    }
}
