//! Engine assembly: the JACK client lifecycle, the process handler, the
//! thread-safe control API, and ordered shutdown.
//!
//! # Lifecycle
//!
//! 1. [`MonitorEngine::new`] connects to the JACK server and registers
//!    ports; without a server there is no engine
//! 2. [`start()`](MonitorEngine::start) activates the callback, runs
//!    auto-connection, starts the metering worker and - when enabled - a
//!    recording session
//! 3. Control methods mutate shared state; the callback picks changes up on
//!    its next period
//! 4. [`stop()`](MonitorEngine::stop) tears down in order: recording
//!    writers (bounded join), metering worker, then synchronous transport
//!    deactivation

use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gain::linear_to_db;
use crate::meter::{ChannelLevels, MeterBank, MeterWorker};
use crate::ports;
use crate::process::{EngineStats, ProcessCore};
use crate::record::{RecordingSession, RecordingShared};
use crate::state::{Controls, EngineState, Route, RoutingMode};

/// JACK process handler: hands port buffers to the core each period.
struct Processor {
    in_ports: Vec<jack::Port<jack::AudioIn>>,
    out_ports: Vec<jack::Port<jack::AudioOut>>,
    core: ProcessCore,
}

impl jack::ProcessHandler for Processor {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let frames = ps.n_frames() as usize;
        let in_ports = &self.in_ports;
        let out_ports = &mut self.out_ports;

        let ok = self.core.run_period(
            frames,
            |i, dst| dst.copy_from_slice(in_ports[i].as_slice(ps)),
            |o, src| out_ports[o].as_mut_slice(ps)[..src.len()].copy_from_slice(src),
        );

        if !ok {
            // One period of silence beats a missed deadline.
            for port in out_ports.iter_mut() {
                port.as_mut_slice(ps).fill(0.0);
            }
        }

        jack::Control::Continue
    }

    fn buffer_size(&mut self, _: &jack::Client, size: jack::Frames) -> jack::Control {
        // Runs outside the real-time context, so reallocation is fine here.
        self.core.resize_period(size as usize);
        jack::Control::Continue
    }
}

/// JACK notification handler: counts xruns for the state report.
struct Notifications {
    stats: Arc<EngineStats>,
}

impl jack::NotificationHandler for Notifications {
    fn xrun(&mut self, _: &jack::Client) -> jack::Control {
        self.stats.xruns.fetch_add(1, Ordering::Relaxed);
        jack::Control::Continue
    }
}

enum Transport {
    Idle {
        client: jack::Client,
        in_ports: Vec<jack::Port<jack::AudioIn>>,
        out_ports: Vec<jack::Port<jack::AudioOut>>,
    },
    Running(jack::AsyncClient<Notifications, Processor>),
    /// Transient while switching; sticks only after a failed activation.
    Switching,
}

/// The audio engine: JACK-driven multichannel monitoring with per-channel
/// gain/mute, simple or matrix routing, level metering, and per-channel
/// recording.
///
/// All control methods are safe to call from any thread while audio runs;
/// a change applies from the next audio period.
///
/// # Example
///
/// ```no_run
/// use monitor_audio::{EngineConfig, MonitorEngine};
///
/// # fn main() -> Result<(), monitor_audio::EngineError> {
/// let mut engine = MonitorEngine::new(EngineConfig::default())?;
/// engine.start()?;
///
/// engine.select_channel(2);
/// engine.set_gain_db(2, -6.0)?;
///
/// // ... run until shutdown ...
/// engine.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct MonitorEngine {
    config: EngineConfig,
    controls: Arc<Controls>,
    meters: Arc<MeterBank>,
    recording: Arc<RecordingShared>,
    stats: Arc<EngineStats>,
    sample_rate: u32,
    period_frames: u32,
    transport: Transport,
    meter_worker: Option<MeterWorker>,
    session: Option<RecordingSession>,
}

impl MonitorEngine {
    /// Connects to the JACK server and registers the engine's ports.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a bad configuration and
    /// [`EngineError::Transport`] when the server is unreachable - the
    /// engine cannot run without a transport.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let (client, status) =
            jack::Client::new(&config.client_name, jack::ClientOptions::NO_START_SERVER)?;
        tracing::info!(
            name = %client.name(),
            ?status,
            sample_rate = client.sample_rate(),
            buffer_size = client.buffer_size(),
            "connected to JACK"
        );

        let in_ports = ports::register_input_ports(&client, config.inputs)?;
        let out_ports = ports::register_output_ports(&client, config.outputs)?;

        let sample_rate = client.sample_rate() as u32;
        let period_frames = client.buffer_size();

        let controls = Arc::new(Controls::new(
            config.inputs,
            config.outputs,
            config.initial_selection(),
        ));
        let meters = Arc::new(MeterBank::new(config.inputs));
        let recording = Arc::new(RecordingShared::new(config.inputs));
        let stats = Arc::new(EngineStats::default());

        Ok(Self {
            config,
            controls,
            meters,
            recording,
            stats,
            sample_rate,
            period_frames,
            transport: Transport::Idle {
                client,
                in_ports,
                out_ports,
            },
            meter_worker: None,
            session: None,
        })
    }

    /// Activates the audio callback and the auxiliary pipelines.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] when already started, a
    /// [`RecordError`](crate::RecordError) wrapped as
    /// [`EngineError::Recording`] when the session directory cannot be
    /// created, or [`EngineError::Transport`] when activation fails.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let (client, in_ports, out_ports) =
            match mem::replace(&mut self.transport, Transport::Switching) {
                Transport::Idle {
                    client,
                    in_ports,
                    out_ports,
                } => (client, in_ports, out_ports),
                other => {
                    self.transport = other;
                    return Err(EngineError::AlreadyRunning);
                }
            };

        let mut producers = Vec::new();
        let mut session = None;
        if self.config.record {
            let queue_capacity =
                self.config.record_queue_periods * self.period_frames as usize;
            match RecordingSession::start(
                &self.config.recordings_dir,
                self.config.inputs,
                self.sample_rate,
                queue_capacity,
                Arc::clone(&self.recording),
            ) {
                Ok((new_session, new_producers)) => {
                    session = Some(new_session);
                    producers = new_producers;
                }
                Err(error) => {
                    self.transport = Transport::Idle {
                        client,
                        in_ports,
                        out_ports,
                    };
                    return Err(error.into());
                }
            }
        }

        let core = ProcessCore::new(
            Arc::clone(&self.controls),
            Arc::clone(&self.meters),
            Arc::clone(&self.recording),
            producers,
            Arc::clone(&self.stats),
            self.period_frames as usize,
        );
        let processor = Processor {
            in_ports,
            out_ports,
            core,
        };
        let notifications = Notifications {
            stats: Arc::clone(&self.stats),
        };

        let active = match client.activate_async(notifications, processor) {
            Ok(active) => active,
            Err(error) => {
                // The client is gone with the failed activation; stop the
                // session we just opened rather than leak its writers.
                if let Some(session) = session {
                    session.stop();
                }
                return Err(error.into());
            }
        };

        if self.config.auto_connect_capture {
            ports::auto_connect_inputs(active.as_client(), &self.config);
        }
        if self.config.auto_connect_playback {
            ports::auto_connect_outputs(active.as_client(), &self.config);
        }

        self.meter_worker = Some(MeterWorker::spawn(Arc::clone(&self.meters)));
        self.session = session;
        self.transport = Transport::Running(active);
        tracing::info!(
            inputs = self.config.inputs,
            outputs = self.config.outputs,
            recording = self.recording.is_active(),
            "engine started"
        );
        Ok(())
    }

    /// Stops the engine: recording writers first (joined with a bounded
    /// timeout), then the metering worker, then synchronous deactivation of
    /// the transport client.
    ///
    /// The recording session is terminal after this; a later `start()`
    /// creates a new one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRunning`] when not started, or a transport
    /// error from deactivation.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let active = match mem::replace(&mut self.transport, Transport::Switching) {
            Transport::Running(active) => active,
            other => {
                self.transport = other;
                return Err(EngineError::NotRunning);
            }
        };

        if let Some(session) = self.session.take() {
            session.stop();
        }
        if let Some(worker) = self.meter_worker.take() {
            worker.stop();
        }

        let (client, _notifications, processor) = active.deactivate()?;
        self.transport = Transport::Idle {
            client,
            in_ports: processor.in_ports,
            out_ports: processor.out_ports,
        };
        tracing::info!("engine stopped");
        Ok(())
    }

    /// Whether the callback is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.transport, Transport::Running(_))
    }

    /// Whether a recording session is accepting blocks.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.is_active()
    }

    /// Sample rate owned by the transport.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per period owned by the transport.
    #[must_use]
    pub fn frames_per_period(&self) -> u32 {
        self.period_frames
    }

    // ---- control surface ----

    /// Selects the channel monitored in simple mode (0-based, clamped).
    pub fn select_channel(&self, channel: usize) {
        self.controls.select_channel(channel);
    }

    /// Clears the selection; simple mode then outputs silence.
    pub fn clear_selection(&self) {
        self.controls.clear_selection();
    }

    /// Switches between simple and matrix routing.
    pub fn set_mode(&self, mode: RoutingMode) {
        self.controls.set_mode(mode);
    }

    /// Sets an input channel's linear gain (negative values clamp to zero).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_gain_linear(&self, channel: usize, gain: f32) -> Result<(), EngineError> {
        self.controls.set_gain_linear(channel, gain)
    }

    /// Sets an input channel's gain in decibels.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_gain_db(&self, channel: usize, gain_db: f32) -> Result<(), EngineError> {
        self.controls.set_gain_db(channel, gain_db)
    }

    /// Mutes or unmutes an input channel. Recording still captures the raw
    /// signal of a muted channel.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_mute(&self, channel: usize, mute: bool) -> Result<(), EngineError> {
        self.controls.set_mute(channel, mute)
    }

    /// Sets an output channel's gain (matrix output stage).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_output_gain(&self, channel: usize, gain: f32) -> Result<(), EngineError> {
        self.controls.set_output_gain(channel, gain)
    }

    /// Mutes or unmutes an output channel (matrix output stage).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_output_mute(&self, channel: usize, mute: bool) -> Result<(), EngineError> {
        self.controls.set_output_mute(channel, mute)
    }

    /// Sets or updates a route; a near-zero gain removes it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn set_route(&self, input: usize, output: usize, gain: f32) -> Result<(), EngineError> {
        self.controls.set_route(input, output, gain)
    }

    /// Removes a route.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for an invalid index.
    pub fn clear_route(&self, input: usize, output: usize) -> Result<(), EngineError> {
        self.controls.clear_route(input, output)
    }

    /// Removes every route.
    pub fn clear_all_routes(&self) {
        self.controls.clear_all_routes();
    }

    /// Atomically replaces the routing table with a preset.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelOutOfRange`] for the first invalid
    /// entry, leaving the current table untouched.
    pub fn load_preset(&self, routes: &[Route]) -> Result<(), EngineError> {
        self.controls.load_preset(routes)
    }

    /// Returns the active routes.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        self.controls.routes()
    }

    /// Returns the smoothed per-channel levels, published at ~20 Hz.
    #[must_use]
    pub fn levels(&self) -> Vec<ChannelLevels> {
        self.meters.levels()
    }

    /// Returns the full engine state for external reporting.
    #[must_use]
    pub fn state(&self) -> EngineState {
        let settings = self.controls.settings();
        let levels = self.meters.levels();
        let gains_db = settings
            .input_gains
            .iter()
            .map(|&g| linear_to_db(g))
            .collect();

        EngineState {
            sample_rate: self.sample_rate,
            frames_per_period: self.period_frames,
            mode: settings.mode,
            selected_channel: settings.selected.map(|c| c + 1),
            gains_linear: settings.input_gains,
            gains_db,
            mutes: settings.input_mutes,
            output_gains: settings.output_gains,
            output_mutes: settings.output_mutes,
            routes: settings.routes,
            peak: levels.iter().map(|l| l.peak).collect(),
            rms: levels.iter().map(|l| l.rms).collect(),
            recording: self.recording.is_active(),
            recording_dropped_blocks: self.recording.dropped_blocks(),
            xruns: self.stats.xruns.load(Ordering::Relaxed),
            callback_errors: self.stats.callback_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("engine dropped while running; stopping");
            let _ = self.stop();
        } else {
            if let Some(session) = self.session.take() {
                session.stop();
            }
            if let Some(worker) = self.meter_worker.take() {
                worker.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Engine tests need a running JACK (or PipeWire-JACK) server; everything
    // below the transport boundary is covered by the per-module tests and
    // tests/integration.rs.
    #[test]
    #[ignore = "requires a JACK server"]
    fn test_engine_lifecycle_against_live_server() {
        let mut config = EngineConfig::default();
        config.record = false;
        config.auto_connect_capture = false;
        config.auto_connect_playback = false;

        let mut engine = MonitorEngine::new(config).unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());

        engine.select_channel(2);
        engine.set_gain_db(1, -6.0).unwrap();
        engine.set_mute(0, true).unwrap();

        std::thread::sleep(Duration::from_millis(200));

        let state = engine.state();
        assert_eq!(state.selected_channel, Some(3));
        assert!((state.gains_db[1] + 6.0).abs() < 1e-4);
        assert!(state.mutes[0]);
        assert!(state.sample_rate > 0);

        engine.stop().unwrap();
        assert!(!engine.is_running());
    }
}
