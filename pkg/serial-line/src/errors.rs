//! A container for all the types of errors generated crate-wide.
//!
//! Every fallible operation on a serial device returns a [`SerialError`].
//! There are exactly three outcomes a caller ever has to handle:
//!
//! - [`SerialError::Eof`]: the device was closed, or the OS says the
//!   handle no longer refers to a live device. Stop using it, you may reopen
//!   the same path to get a new one.
//! - [`SerialError::Config`]: a value you passed in can't be expressed by
//!   this platform. Retrying won't help.
//! - [`SerialError::Io`]: anything else the OS reported, passed through as is.

use crate::config::{LineConfig, StopBits};
use miette::Diagnostic;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use thiserror::Error;

/// The 'top-level' error type for this entire crate.
///
/// Note there is no `From<std::io::Error>` on purpose, OS errors have to be
/// turned into this type through the normalizer so the device closed case
/// always shows up as [`SerialError::Eof`].
#[derive(Error, Diagnostic, Debug)]
pub enum SerialError {
	/// The serial device has been closed, or was invalidated underneath us.
	///
	/// Once a device returns this, every further operation on it will also
	/// return this.
	#[error("The serial device has been closed, or no longer refers to a live device.")]
	#[diagnostic(code(serial_line::eof))]
	Eof,
	/// See [`ConfigError`] for details.
	#[error(transparent)]
	#[diagnostic(transparent)]
	Config(#[from] ConfigError),
	/// The OS returned an error we don't have any special meaning for.
	#[error("The OS returned an error while talking to the serial device: {0}")]
	#[diagnostic(code(serial_line::io_failure))]
	Io(IoError),
}

impl SerialError {
	/// If this is the end of stream error.
	#[must_use]
	pub const fn is_eof(&self) -> bool {
		matches!(self, Self::Eof)
	}

	/// The raw OS error code if this error came directly from the OS.
	#[must_use]
	pub fn raw_os_error(&self) -> Option<i32> {
		match self {
			Self::Io(cause) => cause.raw_os_error(),
			_ => None,
		}
	}
}

impl From<SerialError> for IoError {
	fn from(value: SerialError) -> Self {
		match value {
			SerialError::Eof => IoError::new(IoErrorKind::UnexpectedEof, SerialError::Eof),
			SerialError::Config(cause) => IoError::new(IoErrorKind::InvalidInput, cause),
			SerialError::Io(cause) => cause,
		}
	}
}

/// A value could not be turned into something the OS understands.
///
/// These are always the callers fault, and are raised before any setting on
/// the device gets changed.
#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum ConfigError {
	/// The baud rate is not in the list of rates this platform can set.
	#[error("invalid speed {0}, this platform does not support that baud rate.")]
	#[diagnostic(code(serial_line::config::invalid_speed))]
	InvalidSpeed(u32),
	/// Only 7, and 8 data bits are supported.
	#[error("invalid databits {0}, must be 7 or 8.")]
	#[diagnostic(code(serial_line::config::invalid_data_bits))]
	InvalidDataBits(u8),
	/// The stop bits can't be represented by this platforms backend.
	#[error("invalid stopbits {0}, this platform cannot represent that many stop bits.")]
	#[diagnostic(code(serial_line::config::unsupported_stop_bits))]
	UnsupportedStopBits(StopBits),
	/// The device accepted the settings call, but kept different line settings
	/// than the ones asked for.
	#[error("the device did not apply the line settings {0}, it kept its own instead.")]
	#[diagnostic(
		code(serial_line::config::not_applied),
		help("Pseudo terminals, and some USB adapters only support a subset of line settings."),
	)]
	NotApplied(LineConfig),
	/// The read timeout is larger than what this platform can wait for.
	#[error("invalid read timeout of {0}ms, this platform cannot wait that long in a single read.")]
	#[diagnostic(code(serial_line::config::timeout_out_of_range))]
	TimeoutOutOfRange(i64),
	/// A parity name that we don't know about.
	#[error("unknown parity `{0}`, expected one of: none, odd, even.")]
	#[diagnostic(code(serial_line::config::unknown_parity))]
	UnknownParity(String),
	/// A stop bits value that we don't know about.
	#[error("unknown stop bits `{0}`, expected one of: 1, 1.5, 2.")]
	#[diagnostic(code(serial_line::config::unknown_stop_bits))]
	UnknownStopBits(String),
}

#[cfg(test)]
mod unit_tests {
	use super::*;

	#[test]
	pub fn eof_converts_to_unexpected_eof() {
		let as_io: IoError = SerialError::Eof.into();
		assert_eq!(as_io.kind(), IoErrorKind::UnexpectedEof);
		assert!(SerialError::Eof.is_eof());
		assert_eq!(SerialError::Eof.raw_os_error(), None);
	}

	#[test]
	pub fn io_errors_pass_through_untouched() {
		let error = SerialError::Io(IoError::from_raw_os_error(5));
		assert!(!error.is_eof());
		assert_eq!(error.raw_os_error(), Some(5));
		let as_io: IoError = error.into();
		assert_eq!(
			as_io.raw_os_error(),
			Some(5),
			"OS error code was lost converting back into a std error",
		);
	}

	#[test]
	pub fn config_errors_are_invalid_input() {
		let as_io: IoError = SerialError::from(ConfigError::InvalidSpeed(12)).into();
		assert_eq!(as_io.kind(), IoErrorKind::InvalidInput);
		assert!(
			as_io.to_string().contains("invalid speed 12"),
			"Config error message was lost: {as_io}",
		);
	}
}
