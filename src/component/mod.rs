//! Host widget boundary
//!
//! Declares the frontend component, forwards recorder options to it and
//! decodes the value it reports back.

mod declare;
mod options;
mod value;

pub use declare::{ComponentEnv, ComponentSource, DeclaredComponent, COMPONENT_NAME};
pub use options::{ComponentArgs, RecorderOptions};
pub use value::{decode_component_value, encode_component_value, ComponentError};
