//! WebSocket channel driver
//!
//! One driver task per logical channel. The driver owns the socket and
//! interprets the effects produced by the connection state machine:
//! dialing, subscription flush, liveness replies, backoff sleeps, and
//! teardown. Parsed frames go into the shared retention queue; the
//! dispatcher drains them on its own schedule.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Channel, ChannelEvent, ChannelState, Effect};
use crate::dispatcher::DispatchControl;
use crate::events::{
    parse_stream_message, ping_payload, ChannelRef, EngineOutput, StreamMessage, StreamNotice,
    TerminationReason,
};
use crate::metrics::EngineMetrics;
use crate::retention::{PruneOutcome, RetentionQueue};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Unix milliseconds, zero if the clock is before the epoch.
fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct ChannelDriver {
    channel: Channel,
    config: ConnectionConfig,
    queue: Arc<Mutex<RetentionQueue>>,
    notify: Arc<Notify>,
    out: mpsc::Sender<EngineOutput>,
    control: mpsc::Sender<DispatchControl>,
    shutdown: watch::Receiver<bool>,
    metrics: Arc<EngineMetrics>,
}

impl ChannelDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: ChannelRef,
        config: ConnectionConfig,
        queue: Arc<Mutex<RetentionQueue>>,
        notify: Arc<Notify>,
        out: mpsc::Sender<EngineOutput>,
        control: mpsc::Sender<DispatchControl>,
        shutdown: watch::Receiver<bool>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            channel: Channel::new(channel),
            config,
            queue,
            notify,
            out,
            control,
            shutdown,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        let config = self.config.clone();
        let mut effects = self.channel.transition(ChannelEvent::OpenRequested, &config);

        loop {
            let mut backoff = None;
            let mut dial = false;
            for effect in effects.drain(..) {
                match effect {
                    Effect::OpenSocket => dial = true,
                    Effect::ScheduleBackoff(delay) => {
                        self.metrics.record_reconnect_scheduled();
                        backoff = Some(delay);
                    }
                    Effect::NotifyTerminated(reason) => {
                        if matches!(reason, TerminationReason::FatalClose { .. }) {
                            self.metrics.record_fatal_close();
                        }
                        let _ = self
                            .out
                            .send(EngineOutput::Notice(StreamNotice::ChannelTerminated {
                                channel: self.channel.channel_ref().clone(),
                                reason,
                            }))
                            .await;
                    }
                    Effect::Teardown => {
                        let _ = self
                            .control
                            .send(DispatchControl::DropChannel(
                                self.channel.channel_ref().clone(),
                            ))
                            .await;
                    }
                    // Only meaningful with a live socket
                    Effect::SendText(_) | Effect::SendProbe => {}
                }
            }

            if self.channel.state() == ChannelState::Terminated {
                debug!(channel = %self.channel.channel_ref(), "Driver exiting");
                return;
            }

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        effects = self.channel.transition(ChannelEvent::BackoffExpired, &config);
                    }
                    _ = shutdown.changed() => {
                        effects = self.channel.transition(ChannelEvent::CloseRequested, &config);
                    }
                }
                continue;
            }

            if dial {
                let url = format!(
                    "{}{}",
                    config.endpoint,
                    self.channel
                        .channel_ref()
                        .kind
                        .path(&self.channel.channel_ref().symbol)
                );
                tokio::select! {
                    result = connect_async(url.as_str()) => {
                        match result {
                            Ok((stream, _)) => {
                                effects = self.session(stream, &config, &mut shutdown).await;
                            }
                            Err(err) => {
                                warn!(channel = %self.channel.channel_ref(), error = %err, "Connect failed");
                                effects = self.channel.transition(ChannelEvent::ConnectFailed, &config);
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        effects = self.channel.transition(ChannelEvent::CloseRequested, &config);
                    }
                }
                continue;
            }

            // No effect left anything to do; nothing will wake us again
            warn!(channel = %self.channel.channel_ref(), "Driver stalled, exiting");
            return;
        }
    }

    /// Run one connected session until the socket drops or shutdown.
    /// Returns the effects of the closing transition.
    async fn session(
        &mut self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        config: &ConnectionConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Vec<Effect> {
        let (mut write, mut read) = stream.split();

        let effects = self
            .channel
            .transition(ChannelEvent::SocketOpened { now_ms: unix_ms() }, config);
        if self.flush_effects(effects, &mut write).await.is_err() {
            return self.channel.transition(ChannelEvent::Closed { code: None }, config);
        }

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; burn it
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return self.channel.transition(ChannelEvent::CloseRequested, config);
                }
                _ = heartbeat.tick() => {
                    let effects = self
                        .channel
                        .transition(ChannelEvent::HeartbeatTick { now_ms: unix_ms() }, config);
                    if self.flush_effects(effects, &mut write).await.is_err() {
                        return self.channel.transition(ChannelEvent::Closed { code: None }, config);
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(text.as_str(), &mut write, config).await.is_err() {
                                return self
                                    .channel
                                    .transition(ChannelEvent::Closed { code: None }, config);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.channel
                                .transition(ChannelEvent::InboundData { now_ms: unix_ms() }, config);
                            if write.send(Message::Pong(data)).await.is_err() {
                                return self
                                    .channel
                                    .transition(ChannelEvent::Closed { code: None }, config);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            info!(channel = %self.channel.channel_ref(), code = ?code, "Socket closed");
                            return self.channel.transition(ChannelEvent::Closed { code }, config);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(channel = %self.channel.channel_ref(), error = %err, "Socket error");
                            self.channel.transition(ChannelEvent::TransportError, config);
                            return self.channel.transition(ChannelEvent::Closed { code: None }, config);
                        }
                        None => {
                            return self.channel.transition(ChannelEvent::Closed { code: None }, config);
                        }
                    }
                }
            }
        }
    }

    /// Send every outbound effect through the live socket.
    async fn flush_effects(
        &mut self,
        effects: Vec<Effect>,
        write: &mut WsSink,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        for effect in effects {
            match effect {
                Effect::SendText(text) => write.send(Message::text(text)).await?,
                Effect::SendProbe => {
                    self.metrics.record_probe_sent();
                    write.send(Message::text(ping_payload())).await?;
                }
                // Connection-level effects never arise while the socket
                // is healthy
                other => debug!(?other, "Unexpected effect during session"),
            }
        }
        Ok(())
    }

    /// Parse and route one text frame.
    async fn handle_text(
        &mut self,
        raw: &str,
        write: &mut WsSink,
        config: &ConnectionConfig,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let message = match parse_stream_message(raw) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.record_parse_error();
                warn!(channel = %self.channel.channel_ref(), error = %err, "Dropped malformed frame");
                return Ok(());
            }
        };
        self.metrics.record_frame_ingested();

        if let StreamMessage::Liveness(liveness) = &message {
            let effects = self.channel.transition(
                ChannelEvent::LivenessReceived {
                    kind: liveness.kind,
                    now_ms: unix_ms(),
                },
                config,
            );
            return self.flush_effects(effects, write).await;
        }

        self.channel
            .transition(ChannelEvent::InboundData { now_ms: unix_ms() }, config);

        let outcome = match self.queue.lock() {
            Ok(mut queue) => {
                let outcome =
                    queue.enqueue(message, self.channel.channel_ref().clone(), unix_ms());
                if queue
                    .capacity()
                    .checked_sub(queue.len())
                    .map(|slack| slack < 2)
                    .unwrap_or(true)
                {
                    debug!(depth = queue.len(), "Retention queue near capacity");
                }
                outcome
            }
            Err(_) => {
                warn!("Retention queue lock poisoned");
                PruneOutcome::default()
            }
        };
        if outcome.dropped > 0 {
            self.metrics.record_pruned(outcome.dropped as u64);
        }
        if outcome.critical > 0 {
            self.metrics.record_critical_pruned(outcome.critical as u64);
        }
        self.notify.notify_one();
        Ok(())
    }
}
