//! Capture session module
//!
//! The start/stop state machine that gates recording on signal energy.

mod machine;
mod state;

pub use machine::{CaptureError, CaptureSession};
pub use state::{CaptureState, Transition};
