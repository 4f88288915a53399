//! # monitor-audio
//!
//! Real-time multi-channel audio monitoring over JACK with per-channel
//! gain/mute, selected-channel or matrix routing, continuous level
//! metering, and per-channel disk recording.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use monitor_audio::{EngineConfig, MonitorEngine, RoutingMode};
//!
//! let mut engine = MonitorEngine::new(EngineConfig::load(None)?)?;
//! engine.start()?;
//!
//! // Monitor channel 3 on all outputs, trim channel 2 by 6 dB.
//! engine.select_channel(2);
//! engine.set_gain_db(1, -6.0)?;
//!
//! // Or route freely: input 1 to both outputs at different levels.
//! engine.set_mode(RoutingMode::Matrix);
//! engine.set_route(0, 0, 1.0)?;
//! engine.set_route(0, 1, 0.5)?;
//!
//! // Poll ~20 Hz for the meter stream, or take the full state.
//! let levels = engine.levels();
//! let state = engine.state();
//!
//! engine.stop()?;
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary around the JACK callback:
//!
//! ```text
//! JACK Thread → ProcessCore → peak/RMS accumulators → Meter Worker (~20 Hz)
//!                           → Ring Buffers (per channel) → Writer Threads → WAV
//! ```
//!
//! - **JACK Thread**: Hard-deadline callback; copies the control state once
//!   per period under a short lock, then runs allocation-free
//! - **Control plane**: Gain/mute/routing setters from any thread; a change
//!   applies from the next period, never mid-period
//! - **Meter Worker**: Samples and resets the accumulators at ~20 Hz and
//!   publishes smoothed levels under a separate lock
//! - **Writer Threads**: One bounded queue and one writer per input channel;
//!   a full queue drops whole blocks and counts them, so disk stalls can
//!   never reach the callback
//!
//! Recording taps the raw pre-gain signal: what lands on disk is what the
//! hardware captured, regardless of monitoring gain or mute.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod config;
mod engine;
mod error;
pub mod gain;
mod meter;
mod ports;
mod process;
mod record;
mod state;

pub use config::{EngineConfig, CONFIG_ENV_VAR};
pub use engine::MonitorEngine;
pub use error::{EngineError, RecordError};
pub use meter::{ChannelLevels, MeterBank, MeterWorker, METER_INTERVAL};
pub use process::{EngineStats, ProcessCore};
pub use record::{RecordingSession, RecordingShared, WavWriter};
pub use state::{
    ControlSettings, ControlSnapshot, Controls, EngineState, Route, RoutingMode, ROUTE_EPSILON,
};
