//! Capture backend seam
//!
//! The pipeline only sees an opened stream: its format and a channel of
//! interleaved f32 chunks. [`super::CpalBackend`] is the real microphone;
//! tests substitute a mock.

use super::microphone::MicrophoneError;
use tokio::sync::mpsc;

/// Format of an opened capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Event delivered by a capture backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Interleaved samples normalised to [-1, 1]
    Frames(Vec<f32>),
    /// Hard failure reported by the device
    Error(MicrophoneError),
}

/// An opened capture stream
#[derive(Debug)]
pub struct CaptureStream {
    pub format: StreamFormat,
    pub events: mpsc::Receiver<BackendEvent>,
}

/// Source of microphone audio
#[cfg_attr(test, mockall::automock)]
pub trait CaptureBackend: Send {
    /// Opens the input, requesting `sample_rate` when given.
    ///
    /// Blocks until the device reports its format.
    fn open(&mut self, sample_rate: Option<u32>) -> Result<CaptureStream, MicrophoneError>;

    /// Releases the input, waiting for the device to stop. Safe to call when
    /// nothing is open.
    fn close(&mut self);

    /// Human readable device name
    fn name(&self) -> String;
}

impl CaptureBackend for Box<dyn CaptureBackend> {
    fn open(&mut self, sample_rate: Option<u32>) -> Result<CaptureStream, MicrophoneError> {
        (**self).open(sample_rate)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
