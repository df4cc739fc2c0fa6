//! Capture session states

use std::fmt;

/// Lifecycle of one recording interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// Not listening; waiting for an explicit start
    Idle,
    /// Listening for energy above the start threshold
    ArmedListening,
    /// Speech detected, frames are being kept
    Recording,
    /// Energy fell below the end threshold; frames still kept
    TrailingSilence,
    /// Recording complete, buffer ready
    Finished,
    /// Capture backend failed; no buffer
    Failed,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Finished | CaptureState::Failed)
    }

    /// Frames are being appended to the session
    pub fn is_capturing(self) -> bool {
        matches!(self, CaptureState::Recording | CaptureState::TrailingSilence)
    }

    /// Microphone is open, whether or not speech has started
    pub fn is_active(self) -> bool {
        self == CaptureState::ArmedListening || self.is_capturing()
    }

    pub fn label(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::ArmedListening => "listening",
            CaptureState::Recording => "recording",
            CaptureState::TrailingSilence => "trailing_silence",
            CaptureState::Finished => "finished",
            CaptureState::Failed => "failed",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A state change applied by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CaptureState,
    pub to: CaptureState,
}

impl Transition {
    pub(super) fn new(from: CaptureState, to: CaptureState) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
