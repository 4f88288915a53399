//! Shared control state: channel gains and mutes, monitor selection, and the
//! routing table.
//!
//! All of this state is written by control-plane threads and read once per
//! period by the audio callback. The contract is strict: every access goes
//! through one `parking_lot` mutex held only for plain field copies, and the
//! callback copies the whole state into its own pre-allocated
//! [`ControlSnapshot`] so it never iterates a structure another thread can
//! mutate mid-iteration. A change requested mid-period therefore applies
//! from the next period onward, never partially within the current one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::gain::db_to_linear;

/// Route gains at or below this value count as "not routed".
pub const ROUTE_EPSILON: f32 = 1e-3;

/// How the callback derives outputs from inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One selected input broadcast to every output.
    Simple,
    /// Sparse input×output gain matrix with a soft-clipped output stage.
    Matrix,
}

/// One active routing entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// 0-based input channel.
    pub input: usize,
    /// 0-based output channel.
    pub output: usize,
    /// Linear route gain (> [`ROUTE_EPSILON`]).
    pub gain: f32,
}

/// The full control state behind the mutex.
struct ControlState {
    mode: RoutingMode,
    selected: Option<usize>,
    input_gains: Vec<f32>,
    input_mutes: Vec<bool>,
    output_gains: Vec<f32>,
    output_mutes: Vec<bool>,
    /// Dense `inputs × outputs` gain table; `0.0` means "not routed".
    /// Fixed capacity from construction, so control-path mutations never
    /// allocate.
    route_gains: Vec<f32>,
}

/// Caller-owned storage for one period's consistent view of the controls.
///
/// Allocated once (outside the callback) and refilled every period by
/// [`Controls::snapshot_into`].
pub struct ControlSnapshot {
    /// Routing mode in effect this period.
    pub mode: RoutingMode,
    /// Selected channel for simple mode, if any.
    pub selected: Option<usize>,
    /// Per-input linear gains.
    pub input_gains: Vec<f32>,
    /// Per-input mute flags.
    pub input_mutes: Vec<bool>,
    /// Per-output linear gains (matrix output stage).
    pub output_gains: Vec<f32>,
    /// Per-output mute flags (matrix output stage).
    pub output_mutes: Vec<bool>,
    /// Dense `inputs × outputs` route gain table.
    pub route_gains: Vec<f32>,
}

impl ControlSnapshot {
    /// Creates snapshot storage sized for the given channel counts.
    #[must_use]
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            mode: RoutingMode::Simple,
            selected: None,
            input_gains: vec![1.0; inputs],
            input_mutes: vec![false; inputs],
            output_gains: vec![1.0; outputs],
            output_mutes: vec![false; outputs],
            route_gains: vec![0.0; inputs * outputs],
        }
    }

    /// Route gain for `(input, output)`, `0.0` when not routed.
    #[inline]
    #[must_use]
    pub fn route_gain(&self, input: usize, output: usize) -> f32 {
        self.route_gains[input * self.output_gains.len() + output]
    }
}

/// Owned copy of the control settings for external reporting.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Routing mode.
    pub mode: RoutingMode,
    /// Selected channel (0-based), if any.
    pub selected: Option<usize>,
    /// Per-input linear gains.
    pub input_gains: Vec<f32>,
    /// Per-input mute flags.
    pub input_mutes: Vec<bool>,
    /// Per-output linear gains.
    pub output_gains: Vec<f32>,
    /// Per-output mute flags.
    pub output_mutes: Vec<bool>,
    /// Active routes, sparse.
    pub routes: Vec<Route>,
}

/// Thread-safe control state shared between the control plane and the
/// audio callback.
pub struct Controls {
    inputs: usize,
    outputs: usize,
    state: Mutex<ControlState>,
}

impl Controls {
    /// Creates control state for the given channel counts with unity gains,
    /// nothing muted, an empty routing table, and `initial_selection`
    /// selected in simple mode.
    #[must_use]
    pub fn new(inputs: usize, outputs: usize, initial_selection: usize) -> Self {
        Self {
            inputs,
            outputs,
            state: Mutex::new(ControlState {
                mode: RoutingMode::Simple,
                selected: Some(initial_selection.min(inputs.saturating_sub(1))),
                input_gains: vec![1.0; inputs],
                input_mutes: vec![false; inputs],
                output_gains: vec![1.0; outputs],
                output_mutes: vec![false; outputs],
                route_gains: vec![0.0; inputs * outputs],
            }),
        }
    }

    /// Number of input channels.
    #[must_use]
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    /// Number of output channels.
    #[must_use]
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    fn check_input(&self, channel: usize) -> Result<(), EngineError> {
        if channel < self.inputs {
            Ok(())
        } else {
            Err(EngineError::ChannelOutOfRange {
                channel,
                count: self.inputs,
            })
        }
    }

    fn check_output(&self, channel: usize) -> Result<(), EngineError> {
        if channel < self.outputs {
            Ok(())
        } else {
            Err(EngineError::ChannelOutOfRange {
                channel,
                count: self.outputs,
            })
        }
    }

    /// Selects the channel monitored in simple mode.
    ///
    /// Out-of-range values are clamped into range rather than rejected; the
    /// original control protocol always accepted a selection and pinned it
    /// to the nearest valid channel.
    pub fn select_channel(&self, channel: usize) {
        let clamped = channel.min(self.inputs.saturating_sub(1));
        self.state.lock().selected = Some(clamped);
    }

    /// Clears the selection; simple mode then outputs silence.
    pub fn clear_selection(&self) {
        self.state.lock().selected = None;
    }

    /// Switches between simple and matrix routing.
    pub fn set_mode(&self, mode: RoutingMode) {
        self.state.lock().mode = mode;
    }

    /// Sets an input channel's linear gain. Negative values clamp to zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_gain_linear(&self, channel: usize, gain: f32) -> Result<(), EngineError> {
        self.check_input(channel)?;
        self.state.lock().input_gains[channel] = gain.max(0.0);
        Ok(())
    }

    /// Sets an input channel's gain in decibels.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_gain_db(&self, channel: usize, gain_db: f32) -> Result<(), EngineError> {
        self.set_gain_linear(channel, db_to_linear(gain_db))
    }

    /// Mutes or unmutes an input channel.
    ///
    /// Muting zeroes the channel's routed contribution; recording still
    /// captures the raw signal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_mute(&self, channel: usize, mute: bool) -> Result<(), EngineError> {
        self.check_input(channel)?;
        self.state.lock().input_mutes[channel] = mute;
        Ok(())
    }

    /// Sets an output channel's linear gain (matrix output stage).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_output_gain(&self, channel: usize, gain: f32) -> Result<(), EngineError> {
        self.check_output(channel)?;
        self.state.lock().output_gains[channel] = gain.max(0.0);
        Ok(())
    }

    /// Mutes or unmutes an output channel (matrix output stage).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_output_mute(&self, channel: usize, mute: bool) -> Result<(), EngineError> {
        self.check_output(channel)?;
        self.state.lock().output_mutes[channel] = mute;
        Ok(())
    }

    /// Sets or updates a route. A gain at or below [`ROUTE_EPSILON`] removes
    /// the route; negative gains clamp to zero (and therefore also remove it).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_route(&self, input: usize, output: usize, gain: f32) -> Result<(), EngineError> {
        self.check_input(input)?;
        self.check_output(output)?;
        let gain = gain.max(0.0);
        let mut state = self.state.lock();
        let slot = &mut state.route_gains[input * self.outputs + output];
        *slot = if gain <= ROUTE_EPSILON { 0.0 } else { gain };
        Ok(())
    }

    /// Removes a route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn clear_route(&self, input: usize, output: usize) -> Result<(), EngineError> {
        self.check_input(input)?;
        self.check_output(output)?;
        self.state.lock().route_gains[input * self.outputs + output] = 0.0;
        Ok(())
    }

    /// Removes every route.
    pub fn clear_all_routes(&self) {
        self.state.lock().route_gains.fill(0.0);
    }

    /// Replaces the entire routing table with a preset.
    ///
    /// The whole preset is validated first and applied under a single lock
    /// hold, so the callback either sees the old table or the complete new
    /// one, never a mix.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for the first invalid
    /// entry; the current table is left untouched in that case.
    pub fn load_preset(&self, routes: &[Route]) -> Result<(), EngineError> {
        for route in routes {
            self.check_input(route.input)?;
            self.check_output(route.output)?;
        }
        let mut state = self.state.lock();
        state.route_gains.fill(0.0);
        for route in routes {
            let gain = route.gain.max(0.0);
            if gain > ROUTE_EPSILON {
                state.route_gains[route.input * self.outputs + route.output] = gain;
            }
        }
        Ok(())
    }

    /// Returns the active routes, sparse.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        let state = self.state.lock();
        let mut routes = Vec::new();
        for input in 0..self.inputs {
            for output in 0..self.outputs {
                let gain = state.route_gains[input * self.outputs + output];
                if gain > 0.0 {
                    routes.push(Route {
                        input,
                        output,
                        gain,
                    });
                }
            }
        }
        routes
    }

    /// Returns an owned copy of all control settings for reporting.
    #[must_use]
    pub fn settings(&self) -> ControlSettings {
        let state = self.state.lock();
        let mut routes = Vec::new();
        for input in 0..self.inputs {
            for output in 0..self.outputs {
                let gain = state.route_gains[input * self.outputs + output];
                if gain > 0.0 {
                    routes.push(Route {
                        input,
                        output,
                        gain,
                    });
                }
            }
        }
        ControlSettings {
            mode: state.mode,
            selected: state.selected,
            input_gains: state.input_gains.clone(),
            input_mutes: state.input_mutes.clone(),
            output_gains: state.output_gains.clone(),
            output_mutes: state.output_mutes.clone(),
            routes,
        }
    }

    /// Copies the current control state into pre-allocated snapshot storage.
    ///
    /// This is the callback's once-per-period read: the lock is held only
    /// for the field copies and no allocation happens on either side.
    pub fn snapshot_into(&self, snapshot: &mut ControlSnapshot) {
        let state = self.state.lock();
        snapshot.mode = state.mode;
        snapshot.selected = state.selected;
        snapshot.input_gains.copy_from_slice(&state.input_gains);
        snapshot
            .input_mutes
            .copy_from_slice(&state.input_mutes);
        snapshot
            .output_gains
            .copy_from_slice(&state.output_gains);
        snapshot
            .output_mutes
            .copy_from_slice(&state.output_mutes);
        snapshot.route_gains.copy_from_slice(&state.route_gains);
    }
}

/// Full engine state as reported to external callers.
///
/// Channel numbers are 1-based here, matching the external control
/// protocol; everything internal is 0-based.
#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    /// Sample rate owned by the transport.
    pub sample_rate: u32,
    /// Frames per audio period owned by the transport.
    pub frames_per_period: u32,
    /// Routing mode.
    pub mode: RoutingMode,
    /// Selected channel, 1-based, if any.
    pub selected_channel: Option<usize>,
    /// Per-input linear gains.
    pub gains_linear: Vec<f32>,
    /// Per-input gains in decibels (silence reports the -240 dB sentinel).
    pub gains_db: Vec<f32>,
    /// Per-input mute flags.
    pub mutes: Vec<bool>,
    /// Per-output linear gains.
    pub output_gains: Vec<f32>,
    /// Per-output mute flags.
    pub output_mutes: Vec<bool>,
    /// Active routes.
    pub routes: Vec<Route>,
    /// Smoothed per-input peak levels.
    pub peak: Vec<f32>,
    /// Smoothed per-input RMS levels.
    pub rms: Vec<f32>,
    /// Whether a recording session is active.
    pub recording: bool,
    /// Per-input count of recording blocks dropped to queue overflow.
    pub recording_dropped_blocks: Vec<u64>,
    /// Transport xruns observed since start.
    pub xruns: u64,
    /// Callback periods degraded to silence by an internal error.
    pub callback_errors: u64,
}
