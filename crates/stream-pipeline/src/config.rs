//! Pipeline configuration
//!
//! Defaults match the expected camera cadence; a config file or `EVS_`
//! environment variables can override them.

use config::{Config, ConfigError, Environment, File};
use frame_queue::MAX_FRAME_LAG;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stream_health::{HealthTimeouts, EXPECTED_FPS};

/// Tunables for one preview pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames per second we expect from all cameras.
    pub expected_fps: u32,
    /// Time from last frame until the dropped indicator latches.
    pub frame_dropped_timeout_ms: u64,
    /// Time from last frame until the stream counts as frozen.
    pub stream_freeze_timeout_ms: u64,
    /// Queue capacity between camera and renderer.
    pub max_frame_lag: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            expected_fps: EXPECTED_FPS,
            frame_dropped_timeout_ms: 2 * 1000 / EXPECTED_FPS as u64,
            stream_freeze_timeout_ms: 2000,
            max_frame_lag: MAX_FRAME_LAG,
        }
    }
}

impl PipelineConfig {
    /// Load configuration: defaults, then `evs-preview.toml` (optional),
    /// then `EVS_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("expected_fps", defaults.expected_fps)?
            .set_default("frame_dropped_timeout_ms", defaults.frame_dropped_timeout_ms)?
            .set_default("stream_freeze_timeout_ms", defaults.stream_freeze_timeout_ms)?
            .set_default("max_frame_lag", defaults.max_frame_lag as u64)?
            .add_source(File::with_name("evs-preview").required(false))
            .add_source(Environment::with_prefix("EVS"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with. `load` applies this to
    /// every loaded configuration; hand-built configs can call it directly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_fps == 0 {
            return Err(ConfigError::Message(
                "expected_fps must be greater than zero".into(),
            ));
        }
        if self.max_frame_lag == 0 {
            return Err(ConfigError::Message(
                "max_frame_lag must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Health machine timer durations.
    pub fn timeouts(&self) -> HealthTimeouts {
        HealthTimeouts {
            frame_dropped: Duration::from_millis(self.frame_dropped_timeout_ms),
            stream_freeze: Duration::from_millis(self.stream_freeze_timeout_ms),
        }
    }

    /// Interval between frames at the expected rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.expected_fps as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_derive_from_fps() {
        let config = PipelineConfig::default();
        assert_eq!(config.expected_fps, 30);
        // Two frame periods
        assert_eq!(config.frame_dropped_timeout_ms, 66);
        assert!(config.frame_dropped_timeout_ms < config.stream_freeze_timeout_ms);
        assert_eq!(config.max_frame_lag, MAX_FRAME_LAG);
    }

    #[test]
    fn test_zero_fps_is_rejected() {
        let config = PipelineConfig {
            expected_fps: 0,
            ..PipelineConfig::default()
        };
        // Must be caught at validation, well before frame_interval divides
        // by the rate.
        assert!(config.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = PipelineConfig {
            max_frame_lag: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_conversion() {
        let timeouts = PipelineConfig::default().timeouts();
        assert_eq!(timeouts.frame_dropped, Duration::from_millis(66));
        assert_eq!(timeouts.stream_freeze, Duration::from_secs(2));
    }
}
