//! Engine configuration.
//!
//! Settings start from built-in defaults and may be overridden by a YAML
//! mapping, located via an explicit path, the `MONITOR_AUDIO_CONFIG`
//! environment variable, or a `config.yaml` in the working directory.
//! Channel counts are validated before an engine is ever built; a bad
//! config is rejected here, not inside the audio callback.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::EngineError;

/// Environment variable consulted for the config file path.
pub const CONFIG_ENV_VAR: &str = "MONITOR_AUDIO_CONFIG";

fn default_client_name() -> String {
    "monitor-audio".to_string()
}

fn default_inputs() -> usize {
    6
}

fn default_outputs() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_capture_match() -> String {
    "capture".to_string()
}

fn default_playback_match() -> String {
    "playback".to_string()
}

fn default_selected_channel() -> usize {
    1
}

fn default_record_queue_periods() -> usize {
    128
}

/// Configuration for a [`MonitorEngine`](crate::MonitorEngine).
///
/// Sample rate and period size are deliberately absent: the JACK server owns
/// both, and the engine reports whatever the server provides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Client name registered with the JACK server.
    pub client_name: String,

    /// Number of mono input channels.
    pub inputs: usize,

    /// Number of mono output channels. The first two are named `out_l` and
    /// `out_r`; any beyond that are numbered.
    pub outputs: usize,

    /// Whether a recording session starts together with the engine.
    pub record: bool,

    /// Root directory for recording sessions. Each session gets its own
    /// timestamp-named subdirectory.
    pub recordings_dir: PathBuf,

    /// Whether to auto-connect inputs to physical capture ports.
    pub auto_connect_capture: bool,

    /// Whether to auto-connect outputs to physical playback ports.
    pub auto_connect_playback: bool,

    /// Case-insensitive substring matched against physical capture port
    /// names during auto-connection.
    pub capture_match: String,

    /// Case-insensitive substring matched against physical playback port
    /// names during auto-connection.
    pub playback_match: String,

    /// Initially selected channel, 1-based. Clamped into range.
    pub selected_channel: usize,

    /// Capacity of each channel's recording queue, in audio periods.
    ///
    /// When a queue is full the period is dropped whole and counted; it is
    /// never partially written.
    pub record_queue_periods: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            inputs: default_inputs(),
            outputs: default_outputs(),
            record: default_true(),
            recordings_dir: default_recordings_dir(),
            auto_connect_capture: default_true(),
            auto_connect_playback: default_true(),
            capture_match: default_capture_match(),
            playback_match: default_playback_match(),
            selected_channel: default_selected_channel(),
            record_queue_periods: default_record_queue_periods(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file over the built-in defaults.
    ///
    /// The file is located by, in order: the `path` argument, the
    /// [`CONFIG_ENV_VAR`] environment variable, a `config.yaml` in the
    /// working directory. With none of those present the defaults are
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be read, if the
    /// file is not a YAML mapping of settings, or if the resulting values
    /// fail [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .or_else(|| {
                let fallback = PathBuf::from("config.yaml");
                fallback.exists().then_some(fallback)
            });

        let config = match path {
            None => Self::default(),
            Some(path) => {
                let text =
                    std::fs::read_to_string(&path).map_err(|source| EngineError::ConfigRead {
                        path: path.clone(),
                        source,
                    })?;
                let config: Self = serde_yaml::from_str(&text)
                    .map_err(|source| EngineError::ConfigParse { path, source })?;
                config
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for zero channel counts or a
    /// zero-capacity recording queue.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.inputs == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "inputs must be at least 1".to_string(),
            });
        }
        if self.outputs == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "outputs must be at least 1".to_string(),
            });
        }
        if self.record_queue_periods == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "record_queue_periods must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Initially selected channel as a 0-based index, clamped into range.
    #[must_use]
    pub(crate) fn initial_selection(&self) -> usize {
        self.selected_channel.saturating_sub(1).min(self.inputs - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.client_name, "monitor-audio");
        assert_eq!(config.inputs, 6);
        assert_eq!(config.outputs, 2);
        assert!(config.record);
        assert_eq!(config.recordings_dir, PathBuf::from("recordings"));
        assert_eq!(config.capture_match, "capture");
        assert_eq!(config.playback_match, "playback");
        assert_eq!(config.selected_channel, 1);
        assert_eq!(config.record_queue_periods, 128);
    }

    #[test]
    fn test_config_partial_yaml_keeps_defaults() {
        let config: EngineConfig = serde_yaml::from_str("inputs: 4\nrecord: false\n").unwrap();
        assert_eq!(config.inputs, 4);
        assert!(!config.record);
        assert_eq!(config.outputs, 2);
        assert_eq!(config.capture_match, "capture");
    }

    #[test]
    fn test_config_rejects_non_mapping() {
        let result: Result<EngineConfig, _> = serde_yaml::from_str("- just\n- a\n- list\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_channels() {
        let mut config = EngineConfig::default();
        config.inputs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.outputs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.record_queue_periods = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.yaml");
        std::fs::write(&path, "inputs: 8\noutputs: 8\nselected_channel: 3\n").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.inputs, 8);
        assert_eq!(config.outputs, 8);
        assert_eq!(config.initial_selection(), 2);
    }

    #[test]
    fn test_load_missing_explicit_path_is_error() {
        let result = EngineConfig::load(Some(Path::new("/nonexistent/monitor.yaml")));
        assert!(matches!(result, Err(EngineError::ConfigRead { .. })));
    }

    #[test]
    fn test_initial_selection_clamps() {
        let mut config = EngineConfig::default();
        config.selected_channel = 99;
        assert_eq!(config.initial_selection(), config.inputs - 1);

        config.selected_channel = 0;
        assert_eq!(config.initial_selection(), 0);
    }
}
