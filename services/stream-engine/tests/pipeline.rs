//! End-to-end pipeline tests: retention queue through dispatcher and
//! compute to consumer outputs, without a live socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Notify};

use stream_engine::compute::{compute_bundle, spawn_compute, ComputeJob};
use stream_engine::config::{
    CacheConfig, ConnectionConfig, EngineConfig, IndicatorConfig, QueueConfig,
};
use stream_engine::connection::{reconnect_delay, Channel, ChannelEvent, ChannelState, Effect};
use stream_engine::dispatcher::{DispatchControl, Dispatcher};
use stream_engine::events::{
    ChannelRef, EngineOutput, PriorityClass, StreamKind, StreamMessage, TerminationReason,
};
use stream_engine::metrics::EngineMetrics;
use stream_engine::retention::RetentionQueue;
use stream_engine::socket::ChannelDriver;
use types::ids::SymbolId;
use types::market::{Sample, Timeframe};
use types::signal::{SignalCategory, SignalEvent};

fn sample(i: i64, close: i64) -> Sample {
    Sample {
        time: 1_700_000_000_000 + i * 60_000,
        open: Decimal::from(close),
        high: Decimal::from(close + 1),
        low: Decimal::from(close - 1),
        close: Decimal::from(close),
        volume: Decimal::from(3),
    }
}

fn kline_channel() -> ChannelRef {
    ChannelRef {
        kind: StreamKind::Kline,
        symbol: SymbolId::new("BTCUSDT"),
        timeframe: Some(Timeframe::H1),
    }
}

fn signals_channel() -> ChannelRef {
    ChannelRef {
        kind: StreamKind::Signals,
        symbol: SymbolId::new("BTCUSDT"),
        timeframe: None,
    }
}

fn strong_signal(timestamp: i64) -> SignalEvent {
    SignalEvent {
        symbol: SymbolId::new("BTCUSDT"),
        timestamp,
        price: Decimal::from(50_000),
        category: SignalCategory::StrongBuy,
        forecast_pct: Decimal::from(2),
        confidence: Decimal::new(9, 1),
        indicators: None,
    }
}

struct Pipeline {
    queue: Arc<Mutex<RetentionQueue>>,
    notify: Arc<Notify>,
    control: mpsc::Sender<DispatchControl>,
    out: mpsc::Receiver<EngineOutput>,
}

/// Wire up queue → dispatcher → compute without any sockets.
fn spawn_pipeline(queue_capacity: usize) -> Pipeline {
    let (out_tx, out_rx) = mpsc::channel(4096);
    let metrics = Arc::new(EngineMetrics::new());
    let queue = Arc::new(Mutex::new(RetentionQueue::new(&QueueConfig {
        capacity: queue_capacity,
    })));
    let notify = Arc::new(Notify::new());
    let compute = spawn_compute(
        &CacheConfig::default(),
        IndicatorConfig::default(),
        out_tx.clone(),
        metrics.clone(),
    );
    let (control_tx, control_rx) = mpsc::channel(16);
    let dispatcher = Dispatcher::new(
        queue.clone(),
        notify.clone(),
        control_rx,
        compute,
        out_tx,
        EngineConfig::default().series_len(),
        metrics.clone(),
    );
    tokio::spawn(dispatcher.run());

    Pipeline {
        queue,
        notify,
        control: control_tx,
        out: out_rx,
    }
}

impl Pipeline {
    fn enqueue(&self, message: StreamMessage, origin: ChannelRef) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.enqueue(message, origin, 0);
        }
        self.notify.notify_one();
    }
}

#[tokio::test]
async fn test_kline_produces_candles_volume_and_indicators() {
    let mut pipeline = spawn_pipeline(100);
    let channel = kline_channel();

    pipeline.enqueue(StreamMessage::Kline(sample(0, 100)), channel.clone());

    let mut got_candles = false;
    let mut got_volume = false;
    let mut got_indicators = false;
    for _ in 0..3 {
        match pipeline.out.recv().await.unwrap() {
            EngineOutput::Candles { channel: c, candles } => {
                assert_eq!(c, channel);
                assert_eq!(candles.len(), 1);
                // Render time is demoted to seconds
                assert_eq!(candles[0].time, 1_700_000_000);
                got_candles = true;
            }
            EngineOutput::Volume { bars, .. } => {
                assert_eq!(bars.len(), 1);
                assert!(bars[0].bullish);
                got_volume = true;
            }
            EngineOutput::Indicators { bundle, .. } => {
                // One sample: every series is still warming up
                assert!(bundle.ema_fast.is_empty());
                assert!(bundle.rsi.is_empty());
                got_indicators = true;
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }
    assert!(got_candles && got_volume && got_indicators);
}

#[tokio::test]
async fn test_series_accumulates_across_frames() {
    let mut pipeline = spawn_pipeline(100);
    let channel = kline_channel();

    for i in 0..30 {
        pipeline.enqueue(StreamMessage::Kline(sample(i, 100 + i)), channel.clone());
    }

    // 30 klines produce 30 rounds of three outputs; inspect the last
    // indicator bundle
    let mut last_bundle = None;
    for _ in 0..90 {
        if let EngineOutput::Indicators { bundle, .. } = pipeline.out.recv().await.unwrap() {
            last_bundle = Some(bundle);
        }
    }
    let bundle = last_bundle.expect("no indicator output");
    // Default periods: EMA 9/21, RSI 14, MACD 12/26/9 over 30 samples
    assert_eq!(bundle.ema_fast.len(), 30 - 9 + 1);
    assert_eq!(bundle.ema_slow.len(), 30 - 21 + 1);
    assert_eq!(bundle.rsi.len(), 30 - 14);
    assert_eq!(bundle.macd.macd_line.len(), 30 - 26 + 1);
}

#[tokio::test]
async fn test_same_timestamp_update_replaces_candle() {
    let mut pipeline = spawn_pipeline(100);
    let channel = kline_channel();

    pipeline.enqueue(StreamMessage::Kline(sample(0, 100)), channel.clone());
    let mut updated = sample(0, 100);
    updated.close = Decimal::from(107);
    updated.high = Decimal::from(108);
    pipeline.enqueue(StreamMessage::Kline(updated), channel.clone());

    let mut last_candles = None;
    for _ in 0..6 {
        if let EngineOutput::Candles { candles, .. } = pipeline.out.recv().await.unwrap() {
            last_candles = Some(candles);
        }
    }
    let candles = last_candles.expect("no candle output");
    // Still one candle, carrying the update
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].close, Decimal::from(107));
}

#[tokio::test]
async fn test_signal_passes_through_and_survives_overload() {
    let mut pipeline = spawn_pipeline(100);
    let kline = kline_channel();
    let signals = signals_channel();

    // Saturate the queue well past capacity before the dispatcher can
    // drain much, then land a critical signal
    for i in 0..200 {
        pipeline.enqueue(StreamMessage::Kline(sample(i, 100)), kline.clone());
    }
    pipeline.enqueue(
        StreamMessage::Signal(strong_signal(1_700_000_000_000)),
        signals,
    );

    let mut signal_seen = false;
    while !signal_seen {
        match pipeline.out.recv().await.unwrap() {
            EngineOutput::Signal(event) => {
                assert_eq!(event.category, SignalCategory::StrongBuy);
                signal_seen = true;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_opaque_payload_forwarded_raw() {
    let mut pipeline = spawn_pipeline(100);
    let channel = ChannelRef {
        kind: StreamKind::Depth,
        symbol: SymbolId::new("BTCUSDT"),
        timeframe: None,
    };

    let depth = serde_json::json!({"bids": [["100", "2"]], "asks": [["101", "1"]]});
    pipeline.enqueue(StreamMessage::Opaque(depth.clone()), channel.clone());

    match pipeline.out.recv().await.unwrap() {
        EngineOutput::Raw { channel: c, payload } => {
            assert_eq!(c, channel);
            assert_eq!(payload, depth);
        }
        other => panic!("unexpected output: {:?}", other),
    }
}

#[tokio::test]
async fn test_drop_channel_discards_buffered_frames() {
    let mut pipeline = spawn_pipeline(100);
    let kline = kline_channel();
    let depth = ChannelRef {
        kind: StreamKind::Depth,
        symbol: SymbolId::new("ETHUSDT"),
        timeframe: None,
    };

    // Buffer frames for both channels while the dispatcher has not been
    // woken, then drop the kline channel
    if let Ok(mut queue) = pipeline.queue.lock() {
        for i in 0..5 {
            queue.enqueue(StreamMessage::Kline(sample(i, 100)), kline.clone(), 0);
        }
        queue.enqueue(
            StreamMessage::Opaque(serde_json::json!({"bids": []})),
            depth.clone(),
            0,
        );
    }
    pipeline
        .control
        .send(DispatchControl::DropChannel(kline))
        .await
        .unwrap();
    pipeline.notify.notify_one();

    // Only the depth frame survives
    match pipeline.out.recv().await.unwrap() {
        EngineOutput::Raw { channel, .. } => assert_eq!(channel, depth),
        other => panic!("unexpected output: {:?}", other),
    }
}

#[tokio::test]
async fn test_repeat_snapshot_served_from_cache() {
    let (out_tx, mut out_rx) = mpsc::channel(64);
    let metrics = Arc::new(EngineMetrics::new());
    let client = spawn_compute(
        &CacheConfig::default(),
        IndicatorConfig::default(),
        out_tx,
        metrics.clone(),
    );

    let channel = kline_channel();
    let series: Vec<Sample> = (0..40).map(|i| sample(i, 100 + i)).collect();

    for _ in 0..3 {
        client
            .submit(ComputeJob::Indicators {
                channel: channel.clone(),
                samples: series.clone(),
            })
            .await;
        let output = out_rx.recv().await.unwrap();
        assert!(matches!(output, EngineOutput::Indicators { .. }));
    }

    use std::sync::atomic::Ordering;
    assert_eq!(metrics.cache_misses.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.cache_hits.load(Ordering::Relaxed), 2);
}

#[test]
fn test_ema_published_recurrence() {
    // Closes 1..=15 with a 14-period EMA: seed is the SMA of the first
    // 14 closes (7.5), the next value follows (close - prev) * k + prev
    let samples: Vec<Sample> = (1..=15).map(|i| sample(i, i)).collect();
    let config = IndicatorConfig {
        ema_fast: 14,
        ..IndicatorConfig::default()
    };
    let bundle = compute_bundle(&samples, &config);

    assert_eq!(bundle.ema_fast.len(), 2);
    assert_eq!(bundle.ema_fast[0].value, Decimal::new(75, 1));
    let diff = (bundle.ema_fast[1].value - Decimal::new(85, 1)).abs();
    assert!(diff < Decimal::new(1, 20));
}

#[test]
fn test_reconnect_schedule_and_fatal_close() {
    let config = stream_engine::config::ConnectionConfig::default();

    // Published schedule: 1000, 1500, 2250, ... capped at 60000
    let delays: Vec<u64> = (0..12)
        .map(|n| reconnect_delay(n, &config).as_millis() as u64)
        .collect();
    assert_eq!(delays[0], 1000);
    assert_eq!(delays[1], 1500);
    assert_eq!(delays[2], 2250);
    assert!(delays.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(delays[11], 60_000);

    // A policy-violation close terminates with zero reconnects
    let mut channel = Channel::new(kline_channel());
    channel.transition(ChannelEvent::OpenRequested, &config);
    channel.transition(ChannelEvent::SocketOpened { now_ms: 0 }, &config);
    let effects = channel.transition(ChannelEvent::Closed { code: Some(1008) }, &config);
    assert_eq!(channel.state(), ChannelState::Terminated);
    assert!(effects.contains(&Effect::NotifyTerminated(TerminationReason::FatalClose {
        code: 1008
    })));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_cancelable_during_close() {
    use std::sync::atomic::Ordering;

    let (out_tx, mut out_rx) = mpsc::channel(16);
    let metrics = Arc::new(EngineMetrics::new());
    let queue = Arc::new(Mutex::new(RetentionQueue::new(&QueueConfig::default())));
    let notify = Arc::new(Notify::new());
    let (control_tx, mut control_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Nothing listens on the discard port, so every dial fails fast
    let config = ConnectionConfig {
        endpoint: "ws://127.0.0.1:9".to_string(),
        ..ConnectionConfig::default()
    };
    let channel = ChannelRef {
        kind: StreamKind::Depth,
        symbol: SymbolId::new("BTCUSDT"),
        timeframe: None,
    };
    let driver = ChannelDriver::new(
        channel,
        config,
        queue,
        notify,
        out_tx,
        control_tx,
        shutdown_rx,
        metrics.clone(),
    );
    let task = tokio::spawn(driver.run());

    // Let the first dial fail and a backoff get scheduled
    while metrics.reconnects_scheduled.load(Ordering::Relaxed) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Close while the backoff sleep is in flight
    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    // The driver tore down without dialing again: one scheduled backoff,
    // a teardown control message, and no termination notice
    assert_eq!(metrics.reconnects_scheduled.load(Ordering::Relaxed), 1);
    assert!(matches!(
        control_rx.recv().await,
        Some(DispatchControl::DropChannel(_))
    ));
    assert!(out_rx.try_recv().is_err());
}

#[test]
fn test_queue_overload_keeps_critical() {
    let mut queue = RetentionQueue::new(&QueueConfig { capacity: 100 });
    let kline = kline_channel();
    let signals = signals_channel();

    for i in 0..200 {
        queue.enqueue(StreamMessage::Kline(sample(i, 100)), kline.clone(), i);
    }
    queue.enqueue(StreamMessage::Signal(strong_signal(0)), signals, 200);
    assert!(queue.len() <= 100);

    let mut critical = 0;
    while let Some(item) = queue.dequeue() {
        if item.priority == PriorityClass::Critical {
            critical += 1;
        }
    }
    assert_eq!(critical, 1);
}
