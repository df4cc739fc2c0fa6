//! Host UI commands
//!
//! Commands a page calls on its mounted recorder widgets.

mod commands;

pub use commands::{
    cancel_recording, get_status, mount_recorder, start_recording, stop_recording, take_value,
    AppState, BackendFactory, RecorderInstance, StatusResponse,
};
