//! Channel connection state machine
//!
//! One `Channel` owns the lifecycle of a single logical stream:
//! connect, heartbeat, reconnect-with-backoff, teardown. Transitions are
//! pure functions of `(state, event) -> (state, effects)`; the async
//! socket driver in [`crate::socket`] interprets the effects. This keeps
//! every timing and close-code rule testable without a socket.
//!
//! Reconnect schedule: `delay(n) = min(base × factor^n, max)`, attempts
//! capped; exceeding the cap or receiving a fatal close code (1008/1011)
//! moves the channel to `Terminated` with no further retry.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::events::{
    pong_payload, subscribe_payload, ChannelRef, LivenessKind, TerminationReason,
};

/// Lifecycle states of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Backoff,
    Terminated,
}

/// Events fed into the state machine by the socket driver.
///
/// Wall-clock instants arrive as Unix milliseconds supplied by the
/// caller, so tests can drive the machine with synthetic clocks.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Consumer asked for the channel to come up.
    OpenRequested,
    /// Socket handshake completed.
    SocketOpened { now_ms: i64 },
    /// A genuine data frame arrived (already parsed upstream).
    InboundData { now_ms: i64 },
    /// A liveness frame arrived.
    LivenessReceived { kind: LivenessKind, now_ms: i64 },
    /// The connect attempt itself failed (DNS, refused, TLS).
    ConnectFailed,
    /// The socket closed; `code` is absent for dirty drops.
    Closed { code: Option<u16> },
    /// Transport-level error while the socket was up.
    TransportError,
    /// The scheduled backoff delay elapsed.
    BackoffExpired,
    /// The heartbeat timer ticked.
    HeartbeatTick { now_ms: i64 },
    /// Consumer tore the channel down.
    CloseRequested,
}

/// Side effects the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dial the upstream endpoint.
    OpenSocket,
    /// Send a text frame (subscription flush, pong ack).
    SendText(String),
    /// Send the idle liveness probe.
    SendProbe,
    /// Arm the reconnect timer.
    ScheduleBackoff(Duration),
    /// Surface a terminal condition to the consumer.
    NotifyTerminated(TerminationReason),
    /// Release the socket, cancel timers, drop buffered items.
    Teardown,
}

/// State record for one logical channel.
#[derive(Debug, Clone)]
pub struct Channel {
    channel: ChannelRef,
    state: ChannelState,
    reconnect_attempt: u32,
    /// Unix ms of the last genuine inbound frame. Probe sends do not
    /// touch this; only inbound traffic does.
    last_activity_ms: i64,
    /// Re-sent on every successful open (subscription survives
    /// reconnects).
    subscribe: Option<String>,
}

impl Channel {
    pub fn new(channel: ChannelRef) -> Self {
        let subscribe = channel
            .kind
            .requires_subscribe()
            .then(|| subscribe_payload(&channel.symbol));
        Self {
            channel,
            state: ChannelState::Disconnected,
            reconnect_attempt: 0,
            last_activity_ms: 0,
            subscribe,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn channel_ref(&self) -> &ChannelRef {
        &self.channel
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms
    }

    /// Apply one event, returning the effects the driver must run.
    pub fn transition(&mut self, event: ChannelEvent, config: &ConnectionConfig) -> Vec<Effect> {
        use ChannelState::*;

        match (self.state, event) {
            (Disconnected, ChannelEvent::OpenRequested) => {
                self.state = Connecting;
                debug!(channel = %self.channel, "Opening channel");
                vec![Effect::OpenSocket]
            }

            (Connecting, ChannelEvent::SocketOpened { now_ms }) => {
                self.state = Open;
                self.reconnect_attempt = 0;
                self.last_activity_ms = now_ms;
                info!(channel = %self.channel, "Channel open");
                match &self.subscribe {
                    Some(payload) => vec![Effect::SendText(payload.clone())],
                    None => Vec::new(),
                }
            }

            (Open, ChannelEvent::InboundData { now_ms }) => {
                self.last_activity_ms = now_ms;
                Vec::new()
            }

            (Open, ChannelEvent::LivenessReceived { kind, now_ms }) => {
                // Liveness is inbound traffic: it proves the peer is alive.
                self.last_activity_ms = now_ms;
                match kind {
                    // Server-initiated probes expect an acknowledgment.
                    LivenessKind::Ping | LivenessKind::Heartbeat => {
                        vec![Effect::SendText(pong_payload(now_ms / 1000))]
                    }
                    LivenessKind::Pong => Vec::new(),
                }
            }

            (Open, ChannelEvent::HeartbeatTick { now_ms }) => {
                if now_ms - self.last_activity_ms > config.idle_threshold_ms as i64 {
                    debug!(
                        channel = %self.channel,
                        idle_ms = now_ms - self.last_activity_ms,
                        "Connection idle, sending probe"
                    );
                    vec![Effect::SendProbe]
                } else {
                    Vec::new()
                }
            }

            (Open | Connecting, ChannelEvent::Closed { code }) => {
                self.handle_disconnect(code, config)
            }

            (Connecting, ChannelEvent::ConnectFailed) => self.handle_disconnect(None, config),

            (Open, ChannelEvent::TransportError) => {
                // Non-fatal: the close event that follows decides what
                // happens next.
                warn!(channel = %self.channel, "Transport error");
                Vec::new()
            }

            (Backoff, ChannelEvent::BackoffExpired) => {
                self.reconnect_attempt += 1;
                self.state = Connecting;
                info!(
                    channel = %self.channel,
                    attempt = self.reconnect_attempt,
                    "Reconnecting"
                );
                vec![Effect::OpenSocket]
            }

            (Terminated, ChannelEvent::CloseRequested) => Vec::new(),

            (_, ChannelEvent::CloseRequested) => {
                self.state = Terminated;
                debug!(channel = %self.channel, "Channel closed by consumer");
                vec![Effect::Teardown]
            }

            // Everything else is a stale event for the current state
            // (e.g. a heartbeat tick racing a close) and is ignored.
            (state, event) => {
                debug!(
                    channel = %self.channel,
                    ?state,
                    ?event,
                    "Ignoring event in current state"
                );
                Vec::new()
            }
        }
    }

    fn handle_disconnect(&mut self, code: Option<u16>, config: &ConnectionConfig) -> Vec<Effect> {
        if let Some(code) = code {
            if config.is_fatal_close(code) {
                self.state = ChannelState::Terminated;
                warn!(
                    channel = %self.channel,
                    code,
                    "Fatal close code, not reconnecting"
                );
                return vec![
                    Effect::Teardown,
                    Effect::NotifyTerminated(TerminationReason::FatalClose { code }),
                ];
            }
        }

        if self.reconnect_attempt >= config.max_reconnect_attempts {
            self.state = ChannelState::Terminated;
            warn!(channel = %self.channel, "Maximum reconnection attempts reached");
            return vec![
                Effect::Teardown,
                Effect::NotifyTerminated(TerminationReason::MaxRetriesExceeded),
            ];
        }

        let delay = reconnect_delay(self.reconnect_attempt, config);
        self.state = ChannelState::Backoff;
        info!(
            channel = %self.channel,
            code = ?code,
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "Connection lost, backing off"
        );
        vec![Effect::ScheduleBackoff(delay)]
    }
}

/// Reconnect delay for a given attempt: `min(base × factor^n, max)`.
pub fn reconnect_delay(attempt: u32, config: &ConnectionConfig) -> Duration {
    let delay_ms = (config.base_delay_ms as f64 * config.backoff_factor.powi(attempt as i32))
        .min(config.max_delay_ms as f64);
    Duration::from_millis(delay_ms as u64)
}
