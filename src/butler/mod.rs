//! Background disk I/O worker.

mod thread;

pub use thread::{ButlerCommand, ButlerThread};
