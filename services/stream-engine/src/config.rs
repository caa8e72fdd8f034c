//! Configuration for the stream engine
//!
//! All tunables live here as plain structs with defaults matching the
//! production deployment. The owning application constructs an
//! `EngineConfig` and injects it; nothing reads ambient global state.

/// Connection lifecycle tuning for a single channel.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base WebSocket endpoint, e.g. `ws://localhost:8000`.
    pub endpoint: String,
    /// First reconnect delay in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied per failed attempt.
    pub backoff_factor: f64,
    /// Reconnect delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts allowed before the channel is terminated.
    pub max_reconnect_attempts: u32,
    /// Heartbeat timer period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Send a liveness probe once no inbound traffic has been seen
    /// for this long.
    pub idle_threshold_ms: u64,
    /// Close codes that suppress reconnection entirely.
    pub fatal_close_codes: Vec<u16>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000".to_string(),
            base_delay_ms: 1_000,
            backoff_factor: 1.5,
            max_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            idle_threshold_ms: 30_000,
            // 1008 = policy violation, 1011 = internal server error
            fatal_close_codes: vec![1008, 1011],
        }
    }
}

impl ConnectionConfig {
    /// Whether a close code means the server does not want us back.
    pub fn is_fatal_close(&self, code: u16) -> bool {
        self.fatal_close_codes.contains(&code)
    }
}

/// Retention queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum buffered items before pruning kicks in.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Result cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum cached entries.
    pub capacity: usize,
    /// Percentage of entries (oldest by access) evicted on overflow.
    pub evict_percent: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            evict_percent: 20,
        }
    }
}

/// Indicator periods computed per kline batch.
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorConfig {
    /// Period set folded into the cache fingerprint, so a config change
    /// can never alias a previous cache generation.
    pub fn period_set(&self) -> [usize; 6] {
        [
            self.ema_fast,
            self.ema_slow,
            self.rsi_period,
            self.macd_fast,
            self.macd_slow,
            self.macd_signal,
        ]
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub indicators: IndicatorConfig,
    /// Maximum samples retained per channel series.
    pub max_series_len: usize,
}

impl EngineConfig {
    /// Config with a custom upstream endpoint and defaults elsewhere.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig {
                endpoint: endpoint.into(),
                ..ConnectionConfig::default()
            },
            ..Self::default()
        }
    }

    /// Effective per-channel series bound (default 500 when unset).
    pub fn series_len(&self) -> usize {
        if self.max_series_len == 0 {
            500
        } else {
            self.max_series_len
        }
    }
}
