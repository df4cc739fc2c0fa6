//! Realtime processing pipeline
//!
//! Drives audio → energy → capture session and publishes state changes.

mod realtime;

pub use realtime::{CaptureEvent, CapturePipeline, PipelineConfig, PipelineError};
