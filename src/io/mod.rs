//! Process-private output files.

pub mod sinks;

pub use sinks::{Channel, ProcessSinks, sink_path};
