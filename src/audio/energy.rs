//! Short-term energy estimation
//!
//! Re-chunks incoming interleaved PCM into fixed analysis windows and
//! measures the RMS level of each one.

use super::backend::StreamFormat;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Default analysis window
pub const DEFAULT_WINDOW_MS: u64 = 50;

/// PCM chunk rejected at ingestion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("chunk of {len} samples is not aligned to {channels} channels")]
    Misaligned { len: usize, channels: u16 },

    #[error("chunk contains a non-finite sample at index {0}")]
    NonFinite(usize),

    #[error("empty window")]
    Empty,
}

/// Energy measured over one analysis window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySample {
    /// Start of the window, relative to the first captured frame
    pub timestamp: Duration,
    /// Length of the window
    pub duration: Duration,
    /// RMS amplitude in [0, 1] for normalised input
    pub level: f32,
}

/// One analysis window: its interleaved samples and their energy
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysedWindow {
    pub samples: Vec<f32>,
    pub energy: EnergySample,
}

/// RMS amplitude of a block of samples, all channels pooled
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Checks that a chunk holds whole interleaved frames of finite samples
pub fn validate_chunk(samples: &[f32], channels: u16) -> Result<(), FrameError> {
    let width = usize::from(channels.max(1));
    if samples.len() % width != 0 {
        return Err(FrameError::Misaligned {
            len: samples.len(),
            channels,
        });
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(FrameError::NonFinite(index));
    }
    Ok(())
}

/// Windowed energy estimator
///
/// Push chunks of any size with [`EnergyEstimator::push`], then drain the
/// completed windows by iterating. The iterator yields `None` once the
/// pending samples no longer fill a window and resumes after the next push.
pub struct EnergyEstimator {
    format: StreamFormat,
    window_frames: usize,
    pending: VecDeque<f32>,
    frames_emitted: u64,
}

impl EnergyEstimator {
    pub fn new(format: StreamFormat, window_frames: usize) -> Self {
        Self {
            format,
            window_frames: window_frames.max(1),
            pending: VecDeque::new(),
            frames_emitted: 0,
        }
    }

    /// Window size expressed in milliseconds at the stream sample rate
    pub fn with_window_ms(format: StreamFormat, window_ms: u64) -> Self {
        let frames = (u64::from(format.sample_rate) * window_ms / 1000).max(1) as usize;
        Self::new(format, frames)
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn window_frames(&self) -> usize {
        self.window_frames
    }

    /// Queues a chunk of interleaved samples
    ///
    /// A rejected chunk leaves the estimator untouched.
    pub fn push(&mut self, chunk: &[f32]) -> Result<(), FrameError> {
        validate_chunk(chunk, self.format.channels)?;
        self.pending.extend(chunk.iter().copied());
        Ok(())
    }

    fn window_samples(&self) -> usize {
        self.window_frames * usize::from(self.format.channels.max(1))
    }

    fn frames_to_duration(&self, frames: u64) -> Duration {
        let nanos = u128::from(frames) * 1_000_000_000 / u128::from(self.format.sample_rate.max(1));
        Duration::from_nanos(nanos as u64)
    }
}

impl Iterator for EnergyEstimator {
    type Item = AnalysedWindow;

    fn next(&mut self) -> Option<AnalysedWindow> {
        let len = self.window_samples();
        if self.pending.len() < len {
            return None;
        }
        let samples: Vec<f32> = self.pending.drain(..len).collect();
        let start = self.frames_emitted;
        self.frames_emitted += self.window_frames as u64;

        let timestamp = self.frames_to_duration(start);
        let duration = self.frames_to_duration(self.frames_emitted) - timestamp;
        let level = rms(&samples);

        Some(AnalysedWindow {
            samples,
            energy: EnergySample {
                timestamp,
                duration,
                level,
            },
        })
    }
}
