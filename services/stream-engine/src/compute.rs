//! Offloaded indicator computation
//!
//! Heavy batch math runs on a dedicated worker task behind a typed
//! request/response channel, keeping the dispatcher turn cheap. Every
//! request carries a correlation id; responses are matched against a
//! pending table, never against "whatever came back last".
//!
//! The worker is pure: samples in, results out, no state. Caching and
//! staleness live on the service side. Each channel carries a
//! generation counter that bumps when its series resets, so a response
//! computed against a superseded series is discarded on arrival instead
//! of reaching the consumer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use types::ids::RequestId;
use types::market::{normalize_series, Sample};

use crate::cache::{Fingerprint, ResultCache};
use crate::config::{CacheConfig, IndicatorConfig};
use crate::events::{ChannelRef, EngineOutput};
use crate::indicators::{self, IndicatorSeries, MacdOutput, RenderCandle, VolumePoint};
use crate::metrics::EngineMetrics;
use std::sync::Arc;

/// Complete indicator output for one series snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub ema_fast: IndicatorSeries,
    pub ema_slow: IndicatorSeries,
    pub rsi: IndicatorSeries,
    pub macd: MacdOutput,
}

/// Work the dispatcher can hand to the compute layer.
#[derive(Debug, Clone)]
pub enum ComputeJob {
    /// Reshape a series into render candles.
    Candles {
        channel: ChannelRef,
        samples: Vec<Sample>,
    },
    /// Reshape a series into volume bars.
    Volume {
        channel: ChannelRef,
        samples: Vec<Sample>,
    },
    /// Compute the full indicator bundle.
    Indicators {
        channel: ChannelRef,
        samples: Vec<Sample>,
    },
    /// The channel's series was reset; in-flight results for it are
    /// stale.
    InvalidateChannel { channel: ChannelRef },
    /// Consumer-requested cache reset.
    ClearCache,
}

/// One request sent to the worker.
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub id: RequestId,
    pub op: ComputeOp,
}

/// The pure operations the worker evaluates.
#[derive(Debug, Clone)]
pub enum ComputeOp {
    ProcessCandles { samples: Vec<Sample> },
    ProcessVolume { samples: Vec<Sample> },
    CalculateIndicators {
        samples: Vec<Sample>,
        config: IndicatorConfig,
    },
}

/// One response from the worker, correlated by id.
#[derive(Debug, Clone)]
pub struct ComputeResponse {
    pub id: RequestId,
    pub result: ComputeResult,
}

#[derive(Debug, Clone)]
pub enum ComputeResult {
    Candles(Vec<RenderCandle>),
    Volume(Vec<VolumePoint>),
    Indicators(IndicatorBundle),
}

/// Evaluate one operation. Pure, no shared state.
///
/// The series is normalized first; the math assumes ascending unique
/// timestamps and the feed makes no such promise.
pub fn evaluate(op: ComputeOp) -> ComputeResult {
    match op {
        ComputeOp::ProcessCandles { samples } => {
            let samples = normalize_series(samples);
            ComputeResult::Candles(indicators::process_candles(&samples))
        }
        ComputeOp::ProcessVolume { samples } => {
            let samples = normalize_series(samples);
            ComputeResult::Volume(indicators::process_volume(&samples))
        }
        ComputeOp::CalculateIndicators { samples, config } => {
            let samples = normalize_series(samples);
            ComputeResult::Indicators(compute_bundle(&samples, &config))
        }
    }
}

/// Full bundle for one series snapshot.
pub fn compute_bundle(samples: &[Sample], config: &IndicatorConfig) -> IndicatorBundle {
    IndicatorBundle {
        ema_fast: indicators::ema(samples, config.ema_fast),
        ema_slow: indicators::ema(samples, config.ema_slow),
        rsi: indicators::rsi(samples, config.rsi_period),
        macd: indicators::macd(
            samples,
            config.macd_fast,
            config.macd_slow,
            config.macd_signal,
        ),
    }
}

/// Empty result of the same shape as the operation's output.
fn empty_result(op: &ComputeOp) -> ComputeResult {
    match op {
        ComputeOp::ProcessCandles { .. } => ComputeResult::Candles(Vec::new()),
        ComputeOp::ProcessVolume { .. } => ComputeResult::Volume(Vec::new()),
        ComputeOp::CalculateIndicators { .. } => {
            ComputeResult::Indicators(IndicatorBundle::default())
        }
    }
}

/// Worker loop: evaluate requests until the channel closes.
///
/// A failed computation resolves to an empty result. `Decimal`
/// arithmetic panics on overflow, and one pathological series must not
/// take the worker (and with it every channel's output) down.
pub async fn run_worker(
    mut requests: mpsc::Receiver<ComputeRequest>,
    responses: mpsc::Sender<ComputeResponse>,
) {
    while let Some(request) = requests.recv().await {
        let id = request.id;
        let fallback = empty_result(&request.op);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            evaluate(request.op)
        }))
        .unwrap_or_else(|_| {
            warn!(id = %id, "Computation failed, resolving to empty result");
            fallback
        });
        if responses.send(ComputeResponse { id, result }).await.is_err() {
            debug!("Compute response channel closed, worker exiting");
            break;
        }
    }
}

struct PendingMeta {
    channel: ChannelRef,
    generation: u64,
    /// Set for indicator requests so the result can be cached on
    /// arrival.
    fingerprint: Option<Fingerprint>,
}

/// Service task fronting the worker: owns the cache, the generation
/// table, and the pending-request table.
pub struct ComputeService {
    jobs: mpsc::Receiver<ComputeJob>,
    worker_tx: mpsc::Sender<ComputeRequest>,
    worker_rx: mpsc::Receiver<ComputeResponse>,
    out: mpsc::Sender<EngineOutput>,
    cache: ResultCache,
    indicator_config: IndicatorConfig,
    generations: HashMap<ChannelRef, u64>,
    pending: HashMap<RequestId, PendingMeta>,
    metrics: Arc<EngineMetrics>,
}

/// Dispatcher-side handle.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    jobs: mpsc::Sender<ComputeJob>,
}

impl ComputeClient {
    pub async fn submit(&self, job: ComputeJob) {
        if self.jobs.send(job).await.is_err() {
            warn!("Compute service is gone, job dropped");
        }
    }
}

/// Spawn the worker and service tasks; returns the client handle.
pub fn spawn_compute(
    cache_config: &CacheConfig,
    indicator_config: IndicatorConfig,
    out: mpsc::Sender<EngineOutput>,
    metrics: Arc<EngineMetrics>,
) -> ComputeClient {
    let (job_tx, job_rx) = mpsc::channel(256);
    let (req_tx, req_rx) = mpsc::channel(256);
    let (resp_tx, resp_rx) = mpsc::channel(256);

    tokio::spawn(run_worker(req_rx, resp_tx));

    let service = ComputeService {
        jobs: job_rx,
        worker_tx: req_tx,
        worker_rx: resp_rx,
        out,
        cache: ResultCache::new(cache_config),
        indicator_config,
        generations: HashMap::new(),
        pending: HashMap::new(),
        metrics,
    };
    tokio::spawn(service.run());

    ComputeClient { jobs: job_tx }
}

impl ComputeService {
    async fn run(mut self) {
        loop {
            // Jobs before responses: an invalidation submitted after a
            // compute job must win against that job's in-flight result
            tokio::select! {
                biased;
                job = self.jobs.recv() => {
                    match job {
                        Some(job) => self.handle_job(job).await,
                        None => {
                            debug!("Compute job channel closed, service exiting");
                            break;
                        }
                    }
                }
                response = self.worker_rx.recv() => {
                    match response {
                        Some(response) => self.handle_response(response).await,
                        None => {
                            error!("Compute worker exited unexpectedly");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn generation(&self, channel: &ChannelRef) -> u64 {
        self.generations.get(channel).copied().unwrap_or(0)
    }

    async fn handle_job(&mut self, job: ComputeJob) {
        match job {
            ComputeJob::Candles { channel, samples } => {
                self.submit_to_worker(
                    channel,
                    None,
                    ComputeOp::ProcessCandles { samples },
                )
                .await;
            }
            ComputeJob::Volume { channel, samples } => {
                self.submit_to_worker(channel, None, ComputeOp::ProcessVolume { samples })
                    .await;
            }
            ComputeJob::Indicators { channel, samples } => {
                self.handle_indicator_job(channel, samples).await;
            }
            ComputeJob::InvalidateChannel { channel } => {
                let next = self.generation(&channel) + 1;
                debug!(channel = %channel, generation = next, "Channel series reset");
                self.generations.insert(channel, next);
            }
            ComputeJob::ClearCache => {
                let cleared = self.cache.invalidate_all();
                debug!(cleared, "Result cache cleared");
                let _ = self.out.send(EngineOutput::CacheCleared).await;
            }
        }
    }

    async fn handle_indicator_job(&mut self, channel: ChannelRef, samples: Vec<Sample>) {
        let fingerprint = channel.timeframe.map(|tf| {
            Fingerprint::compute(
                &channel.symbol,
                tf,
                &samples,
                &self.indicator_config.period_set(),
            )
        });

        if let Some(key) = &fingerprint {
            if let Some(bundle) = self.cache.get(key) {
                self.metrics.record_cache_hit();
                let _ = self
                    .out
                    .send(EngineOutput::Indicators { channel, bundle })
                    .await;
                return;
            }
            self.metrics.record_cache_miss();
        }

        let config = self.indicator_config.clone();
        self.submit_to_worker(
            channel,
            fingerprint,
            ComputeOp::CalculateIndicators { samples, config },
        )
        .await;
    }

    async fn submit_to_worker(
        &mut self,
        channel: ChannelRef,
        fingerprint: Option<Fingerprint>,
        op: ComputeOp,
    ) {
        let id = RequestId::new();
        let generation = self.generation(&channel);
        self.pending.insert(
            id,
            PendingMeta {
                channel,
                generation,
                fingerprint,
            },
        );
        self.metrics.record_compute_request();
        if self.worker_tx.send(ComputeRequest { id, op }).await.is_err() {
            error!("Compute worker request channel closed");
            self.pending.remove(&id);
        }
    }

    async fn handle_response(&mut self, response: ComputeResponse) {
        let Some(meta) = self.pending.remove(&response.id) else {
            warn!(id = %response.id, "Uncorrelated compute response dropped");
            return;
        };

        if meta.generation != self.generation(&meta.channel) {
            self.metrics.record_stale_discarded();
            debug!(
                channel = %meta.channel,
                id = %response.id,
                "Discarded stale compute response"
            );
            return;
        }

        let output = match response.result {
            ComputeResult::Candles(candles) => EngineOutput::Candles {
                channel: meta.channel,
                candles,
            },
            ComputeResult::Volume(bars) => EngineOutput::Volume {
                channel: meta.channel,
                bars,
            },
            ComputeResult::Indicators(bundle) => {
                if let Some(key) = meta.fingerprint {
                    self.cache.put(key, bundle.clone());
                }
                EngineOutput::Indicators {
                    channel: meta.channel,
                    bundle,
                }
            }
        };
        let _ = self.out.send(output).await;
    }
}
