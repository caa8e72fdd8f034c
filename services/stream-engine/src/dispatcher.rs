//! Queue drain loop and message routing
//!
//! The dispatcher owns the per-channel candle series and drains the
//! shared retention queue one item per turn, yielding to the runtime
//! between items so a burst of buffered frames can never starve the
//! socket drivers or the compute service.
//!
//! Kline frames are merged into the channel's series (same-timestamp
//! updates replace in place, out-of-order arrivals insert sorted) and
//! the updated snapshot is handed to the compute layer. Signals and
//! opaque payloads pass straight through to the consumer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use types::market::Sample;

use crate::compute::{ComputeClient, ComputeJob};
use crate::events::{ChannelRef, EngineOutput, StreamMessage};
use crate::metrics::EngineMetrics;
use crate::retention::{QueuedItem, RetentionQueue};

/// Control messages from the runtime.
#[derive(Debug)]
pub enum DispatchControl {
    /// A channel was torn down: drop its series, flush its buffered
    /// frames, and mark in-flight compute for it stale.
    DropChannel(ChannelRef),
    Shutdown,
}

pub struct Dispatcher {
    queue: Arc<Mutex<RetentionQueue>>,
    notify: Arc<Notify>,
    control: mpsc::Receiver<DispatchControl>,
    compute: ComputeClient,
    out: mpsc::Sender<EngineOutput>,
    series: HashMap<ChannelRef, Vec<Sample>>,
    max_series_len: usize,
    metrics: Arc<EngineMetrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<Mutex<RetentionQueue>>,
        notify: Arc<Notify>,
        control: mpsc::Receiver<DispatchControl>,
        compute: ComputeClient,
        out: mpsc::Sender<EngineOutput>,
        max_series_len: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            queue,
            notify,
            control,
            compute,
            out,
            series: HashMap::new(),
            max_series_len,
            metrics,
        }
    }

    pub async fn run(mut self) {
        loop {
            // Control messages take priority over queued frames
            while let Ok(control) = self.control.try_recv() {
                if !self.handle_control(control).await {
                    return;
                }
            }

            let item = match self.queue.lock() {
                Ok(mut queue) => queue.dequeue(),
                Err(_) => {
                    warn!("Retention queue lock poisoned, dispatcher exiting");
                    return;
                }
            };

            match item {
                Some(item) => {
                    let started = Instant::now();
                    self.dispatch(item).await;
                    self.metrics
                        .record_dispatch_latency(started.elapsed().as_nanos() as u64);
                    // One item per turn: let other tasks make progress
                    // before draining the next
                    tokio::task::yield_now().await;
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        control = self.control.recv() => {
                            match control {
                                Some(control) => {
                                    if !self.handle_control(control).await {
                                        return;
                                    }
                                }
                                None => {
                                    debug!("Control channel closed, dispatcher exiting");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns false when the dispatcher should stop.
    async fn handle_control(&mut self, control: DispatchControl) -> bool {
        match control {
            DispatchControl::DropChannel(channel) => {
                self.series.remove(&channel);
                if let Ok(mut queue) = self.queue.lock() {
                    queue.clear_origin(&channel);
                }
                self.compute
                    .submit(ComputeJob::InvalidateChannel { channel })
                    .await;
                true
            }
            DispatchControl::Shutdown => {
                debug!("Dispatcher shutting down");
                false
            }
        }
    }

    async fn dispatch(&mut self, item: QueuedItem) {
        match item.payload {
            StreamMessage::Signal(event) => {
                let _ = self.out.send(EngineOutput::Signal(event)).await;
            }
            StreamMessage::Kline(sample) => {
                self.merge_kline(item.origin, sample).await;
            }
            StreamMessage::Opaque(payload) => {
                let _ = self
                    .out
                    .send(EngineOutput::Raw {
                        channel: item.origin,
                        payload,
                    })
                    .await;
            }
            StreamMessage::Liveness(_) => {
                // Liveness is consumed by the connection layer; a queued
                // one indicates a driver bug
                debug!(channel = %item.origin, "Dropped stray liveness frame");
            }
        }
    }

    async fn merge_kline(&mut self, channel: ChannelRef, sample: Sample) {
        if !sample.is_valid() {
            warn!(channel = %channel, time = sample.time, "Dropped kline with inconsistent bounds");
            self.metrics.record_parse_error();
            return;
        }

        let series = self.series.entry(channel.clone()).or_default();
        merge_sample(series, sample);
        if series.len() > self.max_series_len {
            let excess = series.len() - self.max_series_len;
            series.drain(..excess);
        }
        let snapshot = series.clone();

        self.compute
            .submit(ComputeJob::Candles {
                channel: channel.clone(),
                samples: snapshot.clone(),
            })
            .await;
        self.compute
            .submit(ComputeJob::Volume {
                channel: channel.clone(),
                samples: snapshot.clone(),
            })
            .await;
        self.compute
            .submit(ComputeJob::Indicators {
                channel,
                samples: snapshot,
            })
            .await;
    }
}

/// Merge one sample into a time-ascending series.
///
/// An update for an existing timestamp replaces that candle; anything
/// newer appends; a late arrival inserts at its sorted position.
pub fn merge_sample(series: &mut Vec<Sample>, sample: Sample) {
    match series.last() {
        None => series.push(sample),
        Some(last) if sample.time > last.time => series.push(sample),
        Some(last) if sample.time == last.time => {
            let idx = series.len() - 1;
            series[idx] = sample;
        }
        _ => match series.binary_search_by_key(&sample.time, |s| s.time) {
            Ok(idx) => series[idx] = sample,
            Err(idx) => series.insert(idx, sample),
        },
    }
}
