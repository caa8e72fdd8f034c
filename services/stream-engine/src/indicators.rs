//! Technical indicator math
//!
//! All arithmetic runs on `Decimal` so a given input series always
//! produces bit-identical output regardless of evaluation order or
//! platform. Each function returns an empty series rather than erroring
//! when the input is too short to warm up.
//!
//! Warmup conventions:
//! - EMA(p): first value at index `p - 1`, seeded with the SMA of the
//!   first `p` closes, then `ema = (close - prev) * k + prev` with
//!   `k = 2 / (p + 1)`.
//! - RSI(p): first value at index `p`, Wilder-smoothed averages.
//! - MACD(f, s, g): line from index `s - 1`; signal is an EMA(g) over
//!   the line, seeded the same SMA way; histogram where both exist.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use types::market::Sample;

/// One point of a derived series. `time` matches the source sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub time: i64,
    pub value: Decimal,
}

pub type IndicatorSeries = Vec<IndicatorPoint>;

/// Candle shaped for the rendering consumer: time in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderCandle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Volume bar for the rendering consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub time: i64,
    pub value: Decimal,
    /// Close at or above open.
    pub bullish: bool,
}

/// MACD output: the three aligned series.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MacdOutput {
    pub macd_line: IndicatorSeries,
    pub signal_line: IndicatorSeries,
    pub histogram: IndicatorSeries,
}

/// Exponential moving average over closes.
pub fn ema(samples: &[Sample], period: usize) -> IndicatorSeries {
    let points: Vec<(i64, Decimal)> = samples.iter().map(|s| (s.time, s.close)).collect();
    ema_over(&points, period)
}

/// EMA over arbitrary (time, value) points. Shared with the MACD signal
/// line, which smooths the MACD line rather than raw closes.
fn ema_over(points: &[(i64, Decimal)], period: usize) -> IndicatorSeries {
    if period == 0 || points.len() < period {
        return Vec::new();
    }
    let p = Decimal::from(period as u64);
    let k = Decimal::TWO / (p + Decimal::ONE);

    let mut sum = Decimal::ZERO;
    for (_, value) in &points[..period] {
        sum += *value;
    }
    let mut prev = sum / p;

    let mut out = Vec::with_capacity(points.len() - period + 1);
    out.push(IndicatorPoint {
        time: points[period - 1].0,
        value: prev,
    });
    for (time, value) in &points[period..] {
        prev = (*value - prev) * k + prev;
        out.push(IndicatorPoint {
            time: *time,
            value: prev,
        });
    }
    out
}

/// Relative strength index with Wilder smoothing.
///
/// A lossless run (avg loss of zero) divides by a small epsilon instead
/// of saturating, matching the upstream feed's published values.
pub fn rsi(samples: &[Sample], period: usize) -> IndicatorSeries {
    if period == 0 || samples.len() < period + 1 {
        return Vec::new();
    }
    let p = Decimal::from(period as u64);

    let mut gain_sum = Decimal::ZERO;
    let mut loss_sum = Decimal::ZERO;
    for i in 1..=period {
        let delta = samples[i].close - samples[i - 1].close;
        if delta > Decimal::ZERO {
            gain_sum += delta;
        } else {
            loss_sum -= delta;
        }
    }
    let mut avg_gain = gain_sum / p;
    let mut avg_loss = loss_sum / p;

    let mut out = Vec::with_capacity(samples.len() - period);
    out.push(IndicatorPoint {
        time: samples[period].time,
        value: rsi_value(avg_gain, avg_loss),
    });

    for i in (period + 1)..samples.len() {
        let delta = samples[i].close - samples[i - 1].close;
        let (gain, loss) = if delta > Decimal::ZERO {
            (delta, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -delta)
        };
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
        out.push(IndicatorPoint {
            time: samples[i].time,
            value: rsi_value(avg_gain, avg_loss),
        });
    }
    out
}

fn rsi_value(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    // 0.00001, the same floor the upstream publisher uses
    let denom = if avg_loss.is_zero() {
        Decimal::new(1, 5)
    } else {
        avg_loss
    };
    let rs = avg_gain / denom;
    Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs)
}

/// MACD: fast EMA minus slow EMA, with a smoothed signal line.
pub fn macd(samples: &[Sample], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow || samples.len() < slow {
        return MacdOutput::default();
    }

    let fast_ema = ema(samples, fast);
    let slow_ema = ema(samples, slow);

    // Both series are time-aligned to the samples; the slow one starts
    // later, so offset into the fast one.
    let offset = slow - fast;
    let macd_line: IndicatorSeries = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow_point)| IndicatorPoint {
            time: slow_point.time,
            value: fast_ema[offset + i].value - slow_point.value,
        })
        .collect();

    let line_points: Vec<(i64, Decimal)> =
        macd_line.iter().map(|p| (p.time, p.value)).collect();
    let signal_line = ema_over(&line_points, signal);

    let hist_offset = macd_line.len() - signal_line.len();
    let histogram: IndicatorSeries = signal_line
        .iter()
        .enumerate()
        .map(|(i, signal_point)| IndicatorPoint {
            time: signal_point.time,
            value: macd_line[hist_offset + i].value - signal_point.value,
        })
        .collect();

    MacdOutput {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Reshape samples into render candles (time demoted to seconds).
pub fn process_candles(samples: &[Sample]) -> Vec<RenderCandle> {
    samples
        .iter()
        .map(|s| RenderCandle {
            time: s.time / 1000,
            open: s.open,
            high: s.high,
            low: s.low,
            close: s.close,
        })
        .collect()
}

/// Reshape samples into volume bars.
pub fn process_volume(samples: &[Sample]) -> Vec<VolumePoint> {
    samples
        .iter()
        .map(|s| VolumePoint {
            time: s.time / 1000,
            value: s.volume,
            bullish: s.close >= s.open,
        })
        .collect()
}
