//! Fingerprinted result cache for indicator batches
//!
//! Recomputing a full indicator bundle on every kline tick is wasted
//! work when the series tail has not changed. The cache keys a computed
//! bundle by a digest over the series identity and shape, so a repeat
//! request for the same tail is a lookup instead of a recompute.
//!
//! The fingerprint folds in the symbol, timeframe, and configured
//! period set alongside the series tail. Two symbols whose latest
//! candles happen to coincide can never alias each other's results.
//!
//! Eviction is deterministic: on overflow the oldest entries by logical
//! access order are removed, using a monotonic counter rather than wall
//! time so two accesses can never tie.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::debug;

use types::ids::SymbolId;
use types::market::{Sample, Timeframe};

use crate::compute::IndicatorBundle;
use crate::config::CacheConfig;

/// Cache key: SHA-256 over series identity and shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest over symbol, timeframe, the last sample's time and close,
    /// the series length, and the indicator period set.
    pub fn compute(
        symbol: &SymbolId,
        timeframe: Timeframe,
        samples: &[Sample],
        periods: &[usize],
    ) -> Self {
        let (last_time, last_close) = match samples.last() {
            Some(s) => (s.time, s.close),
            None => (0, Decimal::ZERO),
        };

        let mut hasher = Sha256::new();
        hasher.update(symbol.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(timeframe.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(last_time.to_le_bytes());
        hasher.update(b"|");
        hasher.update(last_close.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update((samples.len() as u64).to_le_bytes());
        for period in periods {
            hasher.update(b"|");
            hasher.update((*period as u64).to_le_bytes());
        }
        Self(hasher.finalize().into())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bundle: IndicatorBundle,
    /// Logical access stamp, bumped on every hit.
    last_access: u64,
}

/// Bounded cache of computed indicator bundles.
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<Fingerprint, CacheEntry>,
    capacity: usize,
    evict_percent: usize,
    /// Monotonic logical clock for access ordering.
    clock: u64,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::with_capacity(config.capacity),
            capacity: config.capacity,
            evict_percent: config.evict_percent,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a bundle, bumping its access stamp on a hit.
    pub fn get(&mut self, key: &Fingerprint) -> Option<IndicatorBundle> {
        self.clock += 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = self.clock;
                self.hits += 1;
                Some(entry.bundle.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a bundle, evicting the oldest slice first if full.
    pub fn put(&mut self, key: Fingerprint, bundle: IndicatorBundle) {
        self.clock += 1;
        self.entries.insert(
            key,
            CacheEntry {
                bundle,
                last_access: self.clock,
            },
        );

        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Remove the oldest `evict_percent` of entries by access stamp,
    /// at least one.
    fn evict_oldest(&mut self) {
        let count = (self.capacity * self.evict_percent / 100).max(1);
        let mut stamps: Vec<(u64, Fingerprint)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, *key))
            .collect();
        stamps.sort_unstable_by_key(|(stamp, _)| *stamp);
        for (_, key) in stamps.into_iter().take(count) {
            self.entries.remove(&key);
        }
        debug!(evicted = count, remaining = self.entries.len(), "Cache evicted oldest entries");
    }

    /// Drop everything (consumer-requested reset).
    pub fn invalidate_all(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
