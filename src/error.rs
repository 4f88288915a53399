//! Error types for monitor-audio.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`EngineError`]): Prevent the engine from being built
//!   or a control request from being applied
//! - **Recoverable errors** ([`RecordError`]): Writer-side I/O failures that
//!   stop one channel's recording but never the engine

use std::path::PathBuf;

/// Fatal errors from engine construction and the control surface.
///
/// Transient runtime conditions (a full recording queue, a physical port
/// that is not available yet) are counted and logged instead - they never
/// surface as an `EngineError`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The JACK server could not be reached or refused the client.
    ///
    /// The engine cannot run without a transport, so this is fatal at
    /// construction time.
    #[error("audio transport error: {0}")]
    Transport(#[from] jack::Error),

    /// A configuration value was rejected before the engine was built.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("could not read config file {path}: {source}")]
    ConfigRead {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was not a valid YAML mapping of settings.
    #[error("could not parse config file {path}: {source}")]
    ConfigParse {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A channel index was outside the configured range.
    ///
    /// Control requests with bad indices are rejected, never clamped
    /// (channel selection is the one documented exception).
    #[error("channel {channel} out of range (0..{count})")]
    ChannelOutOfRange {
        /// The rejected 0-based index.
        channel: usize,
        /// Number of configured channels.
        count: usize,
    },

    /// The recording session could not be set up at start.
    #[error("recording setup failed: {0}")]
    Recording(#[from] RecordError),

    /// `start()` was called on an engine that is already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// `stop()` was called on an engine that is not running.
    #[error("engine is not running")]
    NotRunning,
}

/// Errors from the recording pipeline's writer side.
///
/// These are recoverable: the affected channel's writer logs the error and
/// stops, subsequent blocks for that channel are dropped and counted, and
/// every other channel keeps recording.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The session directory could not be created.
    #[error("could not create session directory {path}: {source}")]
    CreateDir {
        /// Directory that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A channel file could not be created or written.
    #[error("file error: {path}: {source}")]
    File {
        /// Path to the channel file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RecordError {
    /// Creates a file error for the given path.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}
