//! The real-time audio core: the per-period processing algorithm.
//!
//! [`ProcessCore`] is invoked once per period by the transport callback and
//! must return within a small fraction of the period. Everything it touches
//! is pre-allocated; the only synchronization on the hot path is one short
//! control-lock hold for the snapshot copy, a lock-free atomic peak update,
//! a try-lock on the RMS accumulator, and non-blocking ring buffer pushes.
//!
//! The core is deliberately transport-agnostic: it reads inputs and writes
//! outputs through caller-supplied closures over plain sample slices. The
//! JACK process handler drives it with port buffers; tests drive it with
//! synthetic ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Observer, Producer};

use crate::gain::soft_clip;
use crate::meter::MeterBank;
use crate::record::RecordingShared;
use crate::state::{ControlSnapshot, Controls, RoutingMode};

/// Counters updated by the callback and polled by control-plane readers.
#[derive(Default)]
pub struct EngineStats {
    /// Periods processed since start.
    pub periods: AtomicU64,
    /// Periods degraded to silence by an internal error.
    pub callback_errors: AtomicU64,
    /// Xruns reported by the transport.
    pub xruns: AtomicU64,
}

/// Per-period processing state. Owned by the transport callback thread.
pub struct ProcessCore {
    controls: Arc<Controls>,
    meters: Arc<MeterBank>,
    recording: Arc<RecordingShared>,
    producers: Vec<ringbuf::HeapProd<f32>>,
    stats: Arc<EngineStats>,
    snapshot: ControlSnapshot,
    /// Raw input copies, pre-gain, fed to the recording queues.
    raw: Vec<Vec<f32>>,
    /// Post-gain/mute buffers, fed to metering and routing.
    post: Vec<Vec<f32>>,
    /// Mix scratch for the matrix output accumulation.
    mix: Vec<f32>,
    /// Kept zeroed; broadcast when nothing is selected.
    silence: Vec<f32>,
    max_frames: usize,
}

impl ProcessCore {
    /// Creates a core with scratch sized for periods up to `max_frames`.
    ///
    /// `producers` are the recording queues in channel order; pass an empty
    /// vec when recording is disabled.
    #[must_use]
    pub fn new(
        controls: Arc<Controls>,
        meters: Arc<MeterBank>,
        recording: Arc<RecordingShared>,
        producers: Vec<ringbuf::HeapProd<f32>>,
        stats: Arc<EngineStats>,
        max_frames: usize,
    ) -> Self {
        let inputs = controls.inputs();
        let outputs = controls.outputs();
        Self {
            snapshot: ControlSnapshot::new(inputs, outputs),
            raw: vec![vec![0.0; max_frames]; inputs],
            post: vec![vec![0.0; max_frames]; inputs],
            mix: vec![0.0; max_frames],
            silence: vec![0.0; max_frames],
            controls,
            meters,
            recording,
            producers,
            stats,
            max_frames,
        }
    }

    /// Re-sizes the period scratch.
    ///
    /// Allocates, so it must only be called from the transport's
    /// buffer-size callback, which runs outside the real-time context.
    pub fn resize_period(&mut self, max_frames: usize) {
        for buf in &mut self.raw {
            buf.resize(max_frames, 0.0);
        }
        for buf in &mut self.post {
            buf.resize(max_frames, 0.0);
        }
        self.mix.resize(max_frames, 0.0);
        self.silence.resize(max_frames, 0.0);
        self.silence.fill(0.0);
        self.max_frames = max_frames;
    }

    /// Runs one audio period.
    ///
    /// `read_input(i, buf)` must fill `buf` with channel `i`'s raw samples;
    /// `write_output(o, buf)` receives the finished buffer for output `o`.
    /// Both are called with exactly `frames` samples.
    ///
    /// Returns `false` without having produced any output when the period
    /// cannot be processed (frame count beyond the scratch capacity); the
    /// caller is responsible for emitting silence in that case. Nothing in
    /// here panics or blocks on a contended resource.
    pub fn run_period<R, W>(&mut self, frames: usize, mut read_input: R, mut write_output: W) -> bool
    where
        R: FnMut(usize, &mut [f32]),
        W: FnMut(usize, &[f32]),
    {
        let inputs = self.controls.inputs();
        let outputs = self.controls.outputs();

        if frames > self.max_frames {
            self.stats.callback_errors.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.stats.periods.fetch_add(1, Ordering::Relaxed);

        // One short lock hold; changes requested mid-period apply next period.
        self.controls.snapshot_into(&mut self.snapshot);

        // Read inputs, apply gain/mute, feed the meters.
        for i in 0..inputs {
            let raw = &mut self.raw[i][..frames];
            read_input(i, raw);

            let effective = if self.snapshot.input_mutes[i] {
                0.0
            } else {
                self.snapshot.input_gains[i]
            };

            let post = &mut self.post[i][..frames];
            let mut peak = 0.0f32;
            let mut sum_squares = 0.0f64;
            for (dst, &src) in post.iter_mut().zip(raw.iter()) {
                let v = src * effective;
                *dst = v;
                peak = peak.max(v.abs());
                sum_squares += f64::from(v) * f64::from(v);
            }

            self.meters.record_peak(i, peak);
            // Contended accumulator: skip this period's RMS contribution
            // rather than wait for the metering worker.
            self.meters.try_record_squares(i, sum_squares, frames as u64);
        }

        // Routing.
        match self.snapshot.mode {
            RoutingMode::Simple => match self.snapshot.selected {
                Some(selected) if selected < inputs => {
                    let post = &self.post[selected][..frames];
                    for o in 0..outputs {
                        write_output(o, post);
                    }
                }
                _ => {
                    let silence = &self.silence[..frames];
                    for o in 0..outputs {
                        write_output(o, silence);
                    }
                }
            },
            RoutingMode::Matrix => {
                for o in 0..outputs {
                    let mix = &mut self.mix[..frames];
                    mix.fill(0.0);
                    for i in 0..inputs {
                        let gain = self.snapshot.route_gain(i, o);
                        if gain > 0.0 {
                            for (dst, &src) in mix.iter_mut().zip(&self.post[i][..frames]) {
                                *dst += src * gain;
                            }
                        }
                    }
                    let stage = if self.snapshot.output_mutes[o] {
                        0.0
                    } else {
                        self.snapshot.output_gains[o]
                    };
                    for sample in mix.iter_mut() {
                        *sample = soft_clip(*sample * stage);
                    }
                    write_output(o, mix);
                }
            }
        }

        // Recording tap: raw pre-gain blocks, whole or not at all.
        if self.recording.is_active() {
            for (i, (producer, raw)) in self.producers.iter_mut().zip(&self.raw).enumerate() {
                if producer.vacant_len() >= frames {
                    producer.push_slice(&raw[..frames]);
                } else {
                    self.recording.count_drop(i);
                }
            }
        }

        true
    }

    /// Counters shared with the engine.
    #[must_use]
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }
}
