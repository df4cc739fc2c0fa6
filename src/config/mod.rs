//! Capture configuration
//!
//! Thresholds, pause duration and sample rate for one capture session,
//! validated once at creation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default energy threshold used for both speech start and speech end
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.01;

/// Default pause (seconds) below the end threshold before auto-stop
pub const DEFAULT_PAUSE_SECS: f64 = 0.8;

/// Invalid configuration, rejected before any capture begins
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid pause duration: {0}s (must be finite and > 0)")]
    InvalidPause(f64),

    #[error("invalid {name} threshold: {value} (must be finite and >= 0)")]
    InvalidThreshold { name: &'static str, value: f32 },

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Speech start/end thresholds
///
/// Accepts either one level for both edges or an explicit pair. In JSON a
/// bare number maps to `Symmetric`, a two-element array to `Split`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnergyThreshold {
    Symmetric(f32),
    Split(f32, f32),
}

impl EnergyThreshold {
    pub fn symmetric(level: f32) -> Self {
        EnergyThreshold::Symmetric(level)
    }

    pub fn split(start: f32, end: f32) -> Self {
        EnergyThreshold::Split(start, end)
    }

    /// Returns `(start, end)`
    pub fn levels(&self) -> (f32, f32) {
        match *self {
            EnergyThreshold::Symmetric(level) => (level, level),
            EnergyThreshold::Split(start, end) => (start, end),
        }
    }
}

impl Default for EnergyThreshold {
    fn default() -> Self {
        EnergyThreshold::Symmetric(DEFAULT_ENERGY_THRESHOLD)
    }
}

impl From<f32> for EnergyThreshold {
    fn from(level: f32) -> Self {
        EnergyThreshold::Symmetric(level)
    }
}

impl From<(f32, f32)> for EnergyThreshold {
    fn from((start, end): (f32, f32)) -> Self {
        EnergyThreshold::Split(start, end)
    }
}

/// Immutable configuration of a capture session
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Energy at or above which speech start is declared
    pub start_threshold: f32,
    /// Energy below which, sustained, the session stops
    pub end_threshold: f32,
    /// Continuous time below `end_threshold` before auto-stop
    pub pause_duration: Duration,
    /// Requested sample rate, `None` for the device default
    pub sample_rate: Option<u32>,
    /// Arm immediately on creation
    pub auto_start: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            start_threshold: DEFAULT_ENERGY_THRESHOLD,
            end_threshold: DEFAULT_ENERGY_THRESHOLD,
            pause_duration: Duration::from_secs_f64(DEFAULT_PAUSE_SECS),
            sample_rate: None,
            auto_start: false,
        }
    }
}

impl CaptureConfig {
    /// Builds a validated configuration.
    ///
    /// `pause_secs` is taken as a float so that zero, negative, non-finite and
    /// out-of-range inputs are rejected instead of panicking in `Duration`.
    pub fn new(
        threshold: EnergyThreshold,
        pause_secs: f64,
        sample_rate: Option<u32>,
        auto_start: bool,
    ) -> Result<Self, ConfigError> {
        if !pause_secs.is_finite() || pause_secs <= 0.0 {
            return Err(ConfigError::InvalidPause(pause_secs));
        }
        let (start_threshold, end_threshold) = threshold.levels();
        let config = Self {
            start_threshold,
            end_threshold,
            pause_duration: Duration::try_from_secs_f64(pause_secs)
                .map_err(|_| ConfigError::InvalidPause(pause_secs))?,
            sample_rate,
            auto_start,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants of an already-built configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("start", self.start_threshold)?;
        check_threshold("end", self.end_threshold)?;
        if self.pause_duration.is_zero() {
            return Err(ConfigError::InvalidPause(0.0));
        }
        if let Some(rate) = self.sample_rate {
            if rate == 0 {
                return Err(ConfigError::InvalidSampleRate(rate));
            }
        }
        Ok(())
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidThreshold { name, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_threshold_sets_both_edges() {
        let config = CaptureConfig::new(EnergyThreshold::symmetric(0.02), 0.8, None, false).unwrap();
        assert_eq!(config.start_threshold, 0.02);
        assert_eq!(config.end_threshold, 0.02);
    }

    #[test]
    fn split_threshold_keeps_hysteresis() {
        let config = CaptureConfig::new(EnergyThreshold::split(0.05, 0.01), 0.8, None, false).unwrap();
        assert_eq!(config.start_threshold, 0.05);
        assert_eq!(config.end_threshold, 0.01);
    }

    #[test]
    fn rejects_zero_and_negative_pause() {
        assert_eq!(
            CaptureConfig::new(EnergyThreshold::default(), 0.0, None, false),
            Err(ConfigError::InvalidPause(0.0))
        );
        assert!(CaptureConfig::new(EnergyThreshold::default(), -1.0, None, false).is_err());
        assert!(CaptureConfig::new(EnergyThreshold::default(), f64::NAN, None, false).is_err());
    }

    #[test]
    fn rejects_pause_too_large_for_duration() {
        assert_eq!(
            CaptureConfig::new(EnergyThreshold::default(), 1e20, None, false),
            Err(ConfigError::InvalidPause(1e20))
        );
    }

    #[test]
    fn rejects_negative_and_non_finite_thresholds() {
        let err = CaptureConfig::new(EnergyThreshold::split(-1.0, 1.0), 3.0, None, false).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidThreshold {
                name: "start",
                value: -1.0
            }
        );
        assert!(CaptureConfig::new(EnergyThreshold::symmetric(f32::INFINITY), 0.8, None, false).is_err());
        assert!(CaptureConfig::new(EnergyThreshold::split(0.01, f32::NAN), 0.8, None, false).is_err());
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert_eq!(
            CaptureConfig::new(EnergyThreshold::default(), 0.8, Some(0), false),
            Err(ConfigError::InvalidSampleRate(0))
        );
    }

    #[test]
    fn threshold_deserializes_from_number_or_pair() {
        let scalar: EnergyThreshold = serde_json::from_str("0.02").unwrap();
        assert_eq!(scalar.levels(), (0.02, 0.02));
        let pair: EnergyThreshold = serde_json::from_str("[0.05, 0.01]").unwrap();
        assert_eq!(pair.levels(), (0.05, 0.01));
    }

    #[test]
    fn default_matches_widget_defaults() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pause_duration, Duration::from_millis(800));
        assert!(!config.auto_start);
    }
}
