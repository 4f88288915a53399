//! Level metering: per-period accumulators sampled at a low rate.
//!
//! The audio callback only feeds cheap accumulators: an atomic running peak
//! (always updated) and a sum-of-squares/count pair behind a try-lock (a
//! contended period simply skips its RMS contribution). A dedicated worker
//! samples and resets the accumulators at ~20 Hz, applies exponential
//! smoothing, and publishes the result under a lock that is disjoint from
//! the control lock - meter readers never contend with gain changes or the
//! callback's control snapshot.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::record::join_timeout;

/// Cadence of the metering worker (~20 Hz).
pub const METER_INTERVAL: Duration = Duration::from_millis(50);

/// Exponential smoothing factor applied to published peak and RMS values.
const SMOOTHING_FACTOR: f32 = 0.3;

/// How long to wait for the metering worker to stop before detaching it.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// A published, smoothed peak/RMS pair for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelLevels {
    /// Smoothed peak absolute sample value since metering started.
    pub peak: f32,
    /// Smoothed RMS level.
    pub rms: f32,
}

#[derive(Default)]
struct SquareAccumulator {
    sum_squares: f64,
    samples: u64,
}

struct MeterChannel {
    /// Running peak as `f32` bits. Peaks are non-negative, and non-negative
    /// floats order like their bit patterns, so `fetch_max` on the bits is a
    /// lock-free float max.
    peak_bits: AtomicU32,
    squares: Mutex<SquareAccumulator>,
}

impl MeterChannel {
    fn new() -> Self {
        Self {
            peak_bits: AtomicU32::new(0),
            squares: Mutex::new(SquareAccumulator::default()),
        }
    }
}

/// Per-channel metering accumulators plus the published levels.
pub struct MeterBank {
    channels: Vec<MeterChannel>,
    published: RwLock<Vec<ChannelLevels>>,
}

impl MeterBank {
    /// Creates a bank for the given number of input channels.
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| MeterChannel::new()).collect(),
            published: RwLock::new(vec![ChannelLevels::default(); channels]),
        }
    }

    /// Number of metered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Folds a period's peak into the running peak. Lock-free; safe to call
    /// from the audio callback every period.
    pub fn record_peak(&self, channel: usize, peak: f32) {
        let Some(meter) = self.channels.get(channel) else {
            return;
        };
        meter
            .peak_bits
            .fetch_max(peak.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Attempts to fold a period's sum-of-squares into the accumulator.
    ///
    /// Returns `false` without waiting when the worker holds the lock; the
    /// period's RMS contribution is then skipped, which the smoothing
    /// tolerates.
    pub fn try_record_squares(&self, channel: usize, sum_squares: f64, samples: u64) -> bool {
        let Some(meter) = self.channels.get(channel) else {
            return false;
        };
        match meter.squares.try_lock() {
            Some(mut accum) => {
                accum.sum_squares += sum_squares;
                accum.samples += samples;
                true
            }
            None => false,
        }
    }

    /// Takes one sample of every accumulator, resets them, and publishes
    /// smoothed levels. Called by the worker each tick.
    pub fn sample_once(&self) {
        let mut published = self.published.write();
        for (meter, levels) in self.channels.iter().zip(published.iter_mut()) {
            let peak = f32::from_bits(meter.peak_bits.swap(0, Ordering::Relaxed));
            let (sum_squares, samples) = {
                let mut accum = meter.squares.lock();
                let taken = (accum.sum_squares, accum.samples);
                *accum = SquareAccumulator::default();
                taken
            };
            let rms = if samples > 0 {
                (sum_squares / samples as f64).sqrt() as f32
            } else {
                0.0
            };

            levels.peak += SMOOTHING_FACTOR * (peak - levels.peak);
            levels.rms += SMOOTHING_FACTOR * (rms - levels.rms);
        }
    }

    /// Returns the most recently published levels.
    #[must_use]
    pub fn levels(&self) -> Vec<ChannelLevels> {
        self.published.read().clone()
    }
}

/// The background thread that drives [`MeterBank::sample_once`] at
/// [`METER_INTERVAL`].
pub struct MeterWorker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MeterWorker {
    /// Spawns the worker thread.
    #[must_use]
    pub fn spawn(bank: Arc<MeterBank>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            tracing::debug!(interval_ms = METER_INTERVAL.as_millis() as u64, "meter worker started");
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(METER_INTERVAL);
                bank.sample_once();
            }
            tracing::debug!("meter worker stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the worker and joins it with a bounded timeout.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            join_timeout(handle, WORKER_STOP_TIMEOUT, "meter worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_smoothing_from_silence() {
        let bank = MeterBank::new(2);
        bank.record_peak(0, 1.0);
        bank.sample_once();

        let levels = bank.levels();
        assert!((levels[0].peak - 0.3).abs() < 1e-6);
        assert_eq!(levels[1].peak, 0.0);
    }

    #[test]
    fn test_peak_keeps_maximum_between_samples() {
        let bank = MeterBank::new(1);
        bank.record_peak(0, 0.2);
        bank.record_peak(0, 0.9);
        bank.record_peak(0, 0.5);
        bank.sample_once();

        assert!((bank.levels()[0].peak - 0.3 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_rms_from_accumulated_squares() {
        let bank = MeterBank::new(1);
        // Constant 0.5 signal over 100 samples: RMS is exactly 0.5.
        assert!(bank.try_record_squares(0, 25.0, 100));
        bank.sample_once();

        assert!((bank.levels()[0].rms - 0.3 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_zero_when_no_samples() {
        let bank = MeterBank::new(1);
        bank.sample_once();
        assert_eq!(bank.levels()[0].rms, 0.0);
    }

    #[test]
    fn test_accumulators_reset_after_sample() {
        let bank = MeterBank::new(1);
        bank.record_peak(0, 1.0);
        bank.try_record_squares(0, 100.0, 100);
        bank.sample_once();
        let first = bank.levels()[0];

        // No new audio: published values decay toward zero.
        bank.sample_once();
        let second = bank.levels()[0];
        assert!(second.peak < first.peak);
        assert!(second.rms < first.rms);
        assert!((second.peak - 0.7 * first.peak).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_channel_ignored() {
        let bank = MeterBank::new(1);
        bank.record_peak(5, 1.0);
        assert!(!bank.try_record_squares(5, 1.0, 1));
        bank.sample_once();
        assert_eq!(bank.levels()[0].peak, 0.0);
    }

    #[test]
    fn test_worker_publishes_and_stops() {
        let bank = Arc::new(MeterBank::new(1));
        let worker = MeterWorker::spawn(Arc::clone(&bank));

        bank.record_peak(0, 1.0);
        // Give the worker time for at least one 50ms tick.
        thread::sleep(Duration::from_millis(200));
        worker.stop();

        assert!(bank.levels()[0].peak > 0.0);
    }
}
