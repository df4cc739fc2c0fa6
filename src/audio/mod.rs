//! Audio capture module
//!
//! Microphone capture, energy estimation, buffer assembly and WAV encoding.

mod backend;
mod buffer;
mod energy;
mod microphone;
mod wav;

#[cfg(test)]
pub use backend::MockCaptureBackend;
pub use backend::{BackendEvent, CaptureBackend, CaptureStream, StreamFormat};
pub use buffer::AudioBuffer;
pub use energy::{
    rms, validate_chunk, AnalysedWindow, EnergyEstimator, EnergySample, FrameError,
    DEFAULT_WINDOW_MS,
};
pub use microphone::{CpalBackend, MicrophoneError};
pub use wav::{encode_wav, WavError};
