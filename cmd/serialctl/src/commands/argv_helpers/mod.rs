//! Argument helpers for commands that take a lot of the exact same arguments.

mod serial;

pub use serial::*;
