//! Engine runtime: channel registry and task wiring
//!
//! `StreamRuntime` owns the shared retention queue, the dispatcher, the
//! compute service, and one driver task per subscribed channel. The
//! embedding application subscribes channels, drains the output
//! receiver, and tears the runtime down when done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use types::ids::SymbolId;
use types::market::Timeframe;

use crate::compute::{spawn_compute, ComputeClient, ComputeJob};
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchControl, Dispatcher};
use crate::events::{ChannelRef, EngineOutput, StreamKind, StreamNotice, TerminationReason};
use crate::metrics::EngineMetrics;
use crate::retention::RetentionQueue;
use crate::socket::ChannelDriver;

/// Errors surfaced by runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("channel {0} is already subscribed")]
    DuplicateChannel(ChannelRef),
    #[error("channel {0} is not subscribed")]
    UnknownChannel(ChannelRef),
    #[error("kline channels require a timeframe")]
    MissingTimeframe,
}

struct ChannelHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct StreamRuntime {
    config: EngineConfig,
    queue: Arc<Mutex<RetentionQueue>>,
    notify: Arc<Notify>,
    compute: ComputeClient,
    control: mpsc::Sender<DispatchControl>,
    out: mpsc::Sender<EngineOutput>,
    channels: HashMap<ChannelRef, ChannelHandle>,
    dispatcher: JoinHandle<()>,
    metrics: Arc<EngineMetrics>,
}

impl StreamRuntime {
    /// Build the runtime and spawn its background tasks. The returned
    /// receiver carries everything the engine produces.
    pub fn new(config: EngineConfig) -> (Self, mpsc::Receiver<EngineOutput>) {
        let (out_tx, out_rx) = mpsc::channel(1024);
        let metrics = Arc::new(EngineMetrics::new());
        let queue = Arc::new(Mutex::new(RetentionQueue::new(&config.queue)));
        let notify = Arc::new(Notify::new());

        let compute = spawn_compute(
            &config.cache,
            config.indicators.clone(),
            out_tx.clone(),
            metrics.clone(),
        );

        let (control_tx, control_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(
            queue.clone(),
            notify.clone(),
            control_rx,
            compute.clone(),
            out_tx.clone(),
            config.series_len(),
            metrics.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());

        info!(endpoint = %config.connection.endpoint, "Stream runtime started");

        (
            Self {
                config,
                queue,
                notify,
                compute,
                control: control_tx,
                out: out_tx,
                channels: HashMap::new(),
                dispatcher,
                metrics,
            },
            out_rx,
        )
    }

    /// Subscribe a channel, spawning its driver task.
    pub fn subscribe(
        &mut self,
        kind: StreamKind,
        symbol: SymbolId,
        timeframe: Option<Timeframe>,
    ) -> Result<ChannelRef, EngineError> {
        if kind == StreamKind::Kline && timeframe.is_none() {
            return Err(EngineError::MissingTimeframe);
        }
        let channel = ChannelRef {
            kind,
            symbol,
            timeframe,
        };
        if self.channels.contains_key(&channel) {
            return Err(EngineError::DuplicateChannel(channel));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = ChannelDriver::new(
            channel.clone(),
            self.config.connection.clone(),
            self.queue.clone(),
            self.notify.clone(),
            self.out.clone(),
            self.control.clone(),
            shutdown_rx,
            self.metrics.clone(),
        );
        let task = tokio::spawn(driver.run());
        self.channels.insert(
            channel.clone(),
            ChannelHandle {
                shutdown: shutdown_tx,
                task,
            },
        );
        info!(channel = %channel, "Subscribed");
        Ok(channel)
    }

    /// Tear a channel down. Buffered frames and in-flight compute for
    /// it are discarded.
    pub async fn unsubscribe(&mut self, channel: &ChannelRef) -> Result<(), EngineError> {
        let handle = self
            .channels
            .remove(channel)
            .ok_or_else(|| EngineError::UnknownChannel(channel.clone()))?;
        let _ = handle.shutdown.send(true);
        debug!(channel = %channel, "Unsubscribed");
        let _ = self
            .out
            .send(EngineOutput::Notice(StreamNotice::ChannelTerminated {
                channel: channel.clone(),
                reason: TerminationReason::ClosedByConsumer,
            }))
            .await;
        Ok(())
    }

    /// Drop every cached indicator bundle.
    pub async fn clear_cache(&self) {
        self.compute.submit(ComputeJob::ClearCache).await;
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    pub fn subscribed_channels(&self) -> Vec<ChannelRef> {
        self.channels.keys().cloned().collect()
    }

    /// Stop every driver and the dispatcher.
    pub async fn shutdown(mut self) {
        for (channel, handle) in self.channels.drain() {
            let _ = handle.shutdown.send(true);
            handle.task.abort();
            debug!(channel = %channel, "Driver stopped");
        }
        let _ = self.control.send(DispatchControl::Shutdown).await;
        // Wake the dispatcher in case it is parked on an empty queue
        self.notify.notify_one();
        self.dispatcher.abort();
        info!("Stream runtime stopped");
    }
}
