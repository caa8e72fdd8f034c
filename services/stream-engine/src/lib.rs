//! Stream Engine
//!
//! Consumes live market WebSocket feeds and produces:
//! - Resilient per-channel connections (backoff, heartbeat, fatal-close
//!   handling)
//! - Priority-aware buffering under consumer overload
//! - Render-ready candle and volume series
//! - EMA / RSI / MACD indicator bundles on deterministic decimal math
//! - Fingerprint-cached batch computation on a dedicated worker
//!
//! # Architecture
//!
//! ```text
//! Upstream WebSocket Feeds
//!        │
//!   ┌────▼─────┐
//!   │ Drivers  │  ← One per channel: connect, heartbeat, reconnect
//!   └────┬─────┘
//!        │
//!   ┌────▼─────┐
//!   │Retention │  ← Bounded queue, priority pruning
//!   └────┬─────┘
//!        │
//!   ┌────▼─────┐
//!   │Dispatcher│  ← One item per turn, series merge
//!   └────┬─────┘
//!        │
//!   ┌────▼─────┐     ┌────────┐
//!   │ Compute  │ ──▶ │ Worker │
//!   │ Service  │ ◀── │ (pure) │
//!   └────┬─────┘     └────────┘
//!        │  ▲
//!        │  └─ Result cache (fingerprinted)
//!        ▼
//!   Consumer (EngineOutput)
//! ```

pub mod cache;
pub mod compute;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod indicators;
pub mod metrics;
pub mod retention;
pub mod runtime;
pub mod socket;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
