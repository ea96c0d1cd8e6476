#![doc = include_str!("../README.md")]
#![allow(
	// I dislike this rule... We import things elsewhere, usually outside of
	// modules themselves.
	clippy::module_name_repetitions,
)]

pub mod config;
pub mod device;
pub mod eof;
pub mod errors;
pub mod sys;
pub mod timed;
pub mod timeout;

pub use crate::{
	config::{LineConfig, Parity, StopBits, DEFAULT_BAUD_RATE},
	device::{Diagnostics, SerialDevice},
	errors::{ConfigError, SerialError},
	sys::{NativePort, PlatformPort},
	timed::{TimedRead, TimedReader},
	timeout::{ReadTimeout, DEFAULT_TIMED_READ_MS},
};

/// Get a list of the serial devices present on this machine.
///
/// This is a snapshot, devices can come and go at any time after it was
/// taken.
///
/// ## Errors
///
/// If we get an error from the OS listing devices.
pub fn available_ports() -> std::io::Result<Vec<std::path::PathBuf>> {
	sys::enumerate()
}
