//! Recorder keyword arguments
//!
//! What a page passes when it places a recorder, with the widget's defaults,
//! and the argument map forwarded to the frontend.

use crate::config::{CaptureConfig, ConfigError, EnergyThreshold, DEFAULT_PAUSE_SECS};
use crate::session::CaptureState;
use serde::{Deserialize, Serialize};

/// Options accepted by the recorder widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderOptions {
    /// Label shown next to the button
    pub text: String,
    /// Scalar for both edges, or `[start, end]`
    pub energy_threshold: EnergyThreshold,
    /// Seconds below the end threshold before auto-stop
    pub pause_threshold: f64,
    pub neutral_color: String,
    pub recording_color: String,
    /// Font Awesome solid icon name
    pub icon_name: String,
    pub icon_size: String,
    pub sample_rate: Option<u32>,
    pub auto_start: bool,
    /// Identity of the widget instance
    pub key: Option<String>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            text: "Click to record".to_string(),
            energy_threshold: EnergyThreshold::default(),
            pause_threshold: DEFAULT_PAUSE_SECS,
            neutral_color: "#303030".to_string(),
            recording_color: "#de1212".to_string(),
            icon_name: "microphone".to_string(),
            icon_size: "3x".to_string(),
            sample_rate: None,
            auto_start: false,
            key: None,
        }
    }
}

/// Arguments forwarded to the frontend component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentArgs {
    pub text: String,
    pub start_threshold: f32,
    pub end_threshold: f32,
    pub pause_threshold: f64,
    pub neutral_color: String,
    pub recording_color: String,
    pub icon_name: String,
    pub icon_size: String,
    pub sample_rate: Option<u32>,
    pub key: Option<String>,
    /// Value reported before any recording completes
    pub default: Option<String>,
    pub auto_start: bool,
}

impl RecorderOptions {
    /// Validated capture configuration for these options
    pub fn capture_config(&self) -> Result<CaptureConfig, ConfigError> {
        CaptureConfig::new(
            self.energy_threshold,
            self.pause_threshold,
            self.sample_rate,
            self.auto_start,
        )
    }

    /// Flattens the options into the frontend argument map
    pub fn component_args(&self) -> ComponentArgs {
        let (start_threshold, end_threshold) = self.energy_threshold.levels();
        ComponentArgs {
            text: self.text.clone(),
            start_threshold,
            end_threshold,
            pause_threshold: self.pause_threshold,
            neutral_color: self.neutral_color.clone(),
            recording_color: self.recording_color.clone(),
            icon_name: self.icon_name.clone(),
            icon_size: self.icon_size.clone(),
            sample_rate: self.sample_rate,
            key: self.key.clone(),
            default: None,
            auto_start: self.auto_start,
        }
    }

    /// Icon colour for the given session state
    pub fn indicator_color(&self, state: CaptureState) -> &str {
        if state.is_active() {
            &self.recording_color
        } else {
            &self.neutral_color
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_gives_widget_defaults() {
        let options: RecorderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, RecorderOptions::default());
        assert_eq!(options.energy_threshold.levels(), (0.01, 0.01));
    }

    #[test]
    fn pair_threshold_is_split_into_start_and_end() {
        let options: RecorderOptions =
            serde_json::from_value(json!({ "energy_threshold": [0.05, 0.01], "key": "fixed" }))
                .unwrap();
        let args = serde_json::to_value(options.component_args()).unwrap();
        assert_eq!(args["start_threshold"], json!(0.05f32));
        assert_eq!(args["end_threshold"], json!(0.01f32));
        assert_eq!(args["key"], json!("fixed"));
        assert_eq!(args["default"], json!(null));
        assert_eq!(args["sample_rate"], json!(null));
    }

    #[test]
    fn capture_config_carries_options() {
        let options = RecorderOptions {
            energy_threshold: EnergyThreshold::symmetric(0.02),
            pause_threshold: 3.0,
            sample_rate: Some(41_000),
            auto_start: true,
            ..Default::default()
        };
        let config = options.capture_config().unwrap();
        assert_eq!(config.start_threshold, 0.02);
        assert_eq!(config.end_threshold, 0.02);
        assert_eq!(config.sample_rate, Some(41_000));
        assert!(config.auto_start);
    }

    #[test]
    fn invalid_pause_is_rejected() {
        let options = RecorderOptions {
            pause_threshold: 0.0,
            ..Default::default()
        };
        assert_eq!(options.capture_config(), Err(ConfigError::InvalidPause(0.0)));
    }

    #[test]
    fn indicator_follows_activity() {
        let options = RecorderOptions::default();
        assert_eq!(options.indicator_color(CaptureState::Idle), "#303030");
        assert_eq!(options.indicator_color(CaptureState::ArmedListening), "#de1212");
        assert_eq!(options.indicator_color(CaptureState::TrailingSilence), "#de1212");
        assert_eq!(options.indicator_color(CaptureState::Finished), "#303030");
    }
}
