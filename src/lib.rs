//! Audio Recorder - voice-activity-gated microphone capture
//!
//! Listens on a microphone, starts recording when speech energy rises above
//! a threshold and stops after a sustained pause. Recordings are delivered
//! as WAV bytes, either to the CLI or to an embedded recorder widget.

pub mod audio;
pub mod component;
pub mod config;
pub mod ipc;
pub mod pipeline;
pub mod session;
