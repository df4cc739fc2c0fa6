//! Voice-activity gated capture session
//!
//! Consumes analysed windows and decides when recorded audio begins and
//! ends. Ingestion errors leave the session untouched; backend failures are
//! terminal.

use super::state::{CaptureState, Transition};
use crate::audio::{
    validate_chunk, AnalysedWindow, AudioBuffer, FrameError, MicrophoneError, StreamFormat,
};
use crate::config::CaptureConfig;
use std::time::Duration;
use thiserror::Error;

/// Capture session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("capture backend failed: {0}")]
    Backend(#[from] MicrophoneError),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("out-of-order energy sample: {got:?} after {last:?}")]
    OutOfOrder { last: Duration, got: Duration },

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: CaptureState,
    },

    #[error("session is closed ({0})")]
    SessionClosed(CaptureState),

    #[error("session not finished ({0})")]
    NotFinished(CaptureState),

    #[error("recording already retrieved")]
    BufferTaken,
}

/// One recording interaction
///
/// Owned by a single pipeline. The finished buffer is handed out once by
/// [`CaptureSession::take_buffer`].
#[derive(Debug)]
pub struct CaptureSession {
    config: CaptureConfig,
    state: CaptureState,
    format: Option<StreamFormat>,
    samples: Vec<f32>,
    silence_accumulated: Duration,
    last_timestamp: Option<Duration>,
    failure: Option<MicrophoneError>,
    buffer_taken: bool,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            format: None,
            samples: Vec::new(),
            silence_accumulated: Duration::ZERO,
            last_timestamp: None,
            failure: None,
            buffer_taken: false,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn silence_accumulated(&self) -> Duration {
        self.silence_accumulated
    }

    /// Samples kept so far (interleaved)
    pub fn captured_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn failure(&self) -> Option<&MicrophoneError> {
        self.failure.as_ref()
    }

    /// Arms the session on an opened stream: `Idle -> ArmedListening`
    pub fn start(&mut self, format: StreamFormat) -> Result<Transition, CaptureError> {
        match self.state {
            CaptureState::Idle => {
                self.format = Some(format);
                self.last_timestamp = None;
                Ok(self.enter(CaptureState::ArmedListening))
            }
            state if state.is_terminal() => Err(CaptureError::SessionClosed(state)),
            state => Err(CaptureError::InvalidTransition {
                action: "start",
                state,
            }),
        }
    }

    /// Feeds one analysed window.
    ///
    /// Returns the transition it caused, if any. A rejected window changes
    /// nothing.
    pub fn ingest(&mut self, window: AnalysedWindow) -> Result<Option<Transition>, CaptureError> {
        let format = match self.state {
            CaptureState::Idle => {
                return Err(CaptureError::InvalidTransition {
                    action: "ingest",
                    state: CaptureState::Idle,
                })
            }
            state if state.is_terminal() => return Err(CaptureError::SessionClosed(state)),
            _ => self.format.ok_or(CaptureError::InvalidTransition {
                action: "ingest",
                state: self.state,
            })?,
        };
        self.check_window(&window, format)?;

        let energy = window.energy;
        self.last_timestamp = Some(energy.timestamp);

        match self.state {
            CaptureState::ArmedListening => {
                if energy.level < self.config.start_threshold {
                    return Ok(None);
                }
                self.silence_accumulated = Duration::ZERO;
                self.samples.extend(window.samples);
                tracing::debug!("Speech start at {:?} (level {:.4})", energy.timestamp, energy.level);
                Ok(Some(self.enter(CaptureState::Recording)))
            }
            CaptureState::Recording => {
                self.samples.extend(window.samples);
                if energy.level >= self.config.end_threshold {
                    return Ok(None);
                }
                self.silence_accumulated = energy.duration;
                // a single window can cover the whole pause
                if let Some(finished) = self.finish_if_paused() {
                    return Ok(Some(finished));
                }
                Ok(Some(self.enter(CaptureState::TrailingSilence)))
            }
            CaptureState::TrailingSilence => {
                self.samples.extend(window.samples);
                if energy.level >= self.config.end_threshold {
                    self.silence_accumulated = Duration::ZERO;
                    return Ok(Some(self.enter(CaptureState::Recording)));
                }
                self.silence_accumulated += energy.duration;
                Ok(self.finish_if_paused())
            }
            CaptureState::Idle | CaptureState::Finished | CaptureState::Failed => Ok(None),
        }
    }

    /// Manual stop; always wins over the silence timer.
    ///
    /// Stopping while still armed yields an empty buffer.
    pub fn stop(&mut self) -> Result<Transition, CaptureError> {
        match self.state {
            CaptureState::ArmedListening
            | CaptureState::Recording
            | CaptureState::TrailingSilence => {
                tracing::debug!("Manual stop with {} samples", self.samples.len());
                Ok(self.enter(CaptureState::Finished))
            }
            CaptureState::Idle => Err(CaptureError::InvalidTransition {
                action: "stop",
                state: CaptureState::Idle,
            }),
            state => Err(CaptureError::SessionClosed(state)),
        }
    }

    /// Discards any partial audio and returns to `Idle`.
    ///
    /// `Ok(None)` when already idle.
    pub fn cancel(&mut self) -> Result<Option<Transition>, CaptureError> {
        match self.state {
            CaptureState::Idle => Ok(None),
            state if state.is_terminal() => Err(CaptureError::SessionClosed(state)),
            _ => {
                self.reset_capture();
                self.format = None;
                Ok(Some(self.enter(CaptureState::Idle)))
            }
        }
    }

    /// Records a hard backend failure: any non-terminal state -> `Failed`
    pub fn fail(&mut self, reason: MicrophoneError) -> Result<Transition, CaptureError> {
        if self.state.is_terminal() {
            return Err(CaptureError::SessionClosed(self.state));
        }
        tracing::error!("Capture failed while {}: {}", self.state, reason);
        self.reset_capture();
        self.failure = Some(reason);
        Ok(self.enter(CaptureState::Failed))
    }

    /// Hands out the finished recording, once
    pub fn take_buffer(&mut self) -> Result<AudioBuffer, CaptureError> {
        match self.state {
            CaptureState::Finished if self.buffer_taken => Err(CaptureError::BufferTaken),
            CaptureState::Finished => {
                let format = self.format.ok_or(CaptureError::NotFinished(self.state))?;
                self.buffer_taken = true;
                let samples = std::mem::take(&mut self.samples);
                Ok(AudioBuffer::new(samples, format.sample_rate, format.channels))
            }
            CaptureState::Failed => match &self.failure {
                Some(reason) => Err(CaptureError::Backend(reason.clone())),
                None => Err(CaptureError::SessionClosed(CaptureState::Failed)),
            },
            state => Err(CaptureError::NotFinished(state)),
        }
    }

    fn check_window(&self, window: &AnalysedWindow, format: StreamFormat) -> Result<(), CaptureError> {
        if window.samples.is_empty() {
            return Err(FrameError::Empty.into());
        }
        validate_chunk(&window.samples, format.channels)?;
        if let Some(last) = self.last_timestamp {
            if window.energy.timestamp < last {
                return Err(CaptureError::OutOfOrder {
                    last,
                    got: window.energy.timestamp,
                });
            }
        }
        Ok(())
    }

    fn finish_if_paused(&mut self) -> Option<Transition> {
        if self.silence_accumulated >= self.config.pause_duration {
            tracing::debug!("Pause of {:?} reached", self.silence_accumulated);
            Some(self.enter(CaptureState::Finished))
        } else {
            None
        }
    }

    fn reset_capture(&mut self) {
        self.samples.clear();
        self.silence_accumulated = Duration::ZERO;
        self.last_timestamp = None;
    }

    fn enter(&mut self, to: CaptureState) -> Transition {
        let transition = Transition::new(self.state, to);
        self.state = to;
        transition
    }
}
