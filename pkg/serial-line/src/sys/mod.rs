//! Contains the per os raw implementations of a serial port.
//!
//! Each backend is a thin wrapper around the OS APIs that implements
//! [`NativePort`]. Exactly one of them is compiled in, and gets exported as
//! [`PlatformPort`]. Backends never decide what an error *means*, they report
//! the raw OS error, and the device handle runs it through
//! [`crate::eof::normalize`].
//!
//! The one promise every backend makes: once [`NativePort::shutdown`] has been
//! called, every call (including ones already blocked inside the OS) fails
//! with the [`DEVICE_INVALIDATED`] error code.

#[cfg(any(
	target_os = "dragonfly",
	target_os = "freebsd",
	target_os = "ios",
	target_os = "macos",
	target_os = "netbsd",
	target_os = "openbsd",
	target_os = "linux",
	target_os = "android",
))]
mod unix;
#[cfg(any(
	target_os = "dragonfly",
	target_os = "freebsd",
	target_os = "ios",
	target_os = "macos",
	target_os = "netbsd",
	target_os = "openbsd",
	target_os = "linux",
	target_os = "android",
))]
pub use unix::{
	enumerate, translate_line_config, translate_timeout, RawSerialPort as PlatformPort,
	TermiosTimeout, DEVICE_INVALIDATED,
};

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::{
	enumerate, translate_line_config, translate_timeout, RawSerialPort as PlatformPort,
	DEVICE_INVALIDATED,
};

use crate::{
	config::LineConfig,
	errors::{ConfigError, SerialError},
	timeout::ReadTimeout,
};
use std::{fmt::Debug, io::Result as IoResult, path::Path};

/// The capabilities a serial port backend has to provide.
///
/// This is implemented once per OS, you generally want to use
/// [`crate::SerialDevice`] rather than any of these directly.
pub trait NativePort: Send + Sync + Sized {
	/// The native form of a read timeout policy.
	type Timeout: Copy + Debug + Send;

	/// Acquire the device at `path`, and commit `config` plus a blocking read
	/// policy to it.
	///
	/// The whole configuration must be translated before anything is written
	/// to the device, and anything acquired must be released again if this
	/// fails.
	///
	/// ## Errors
	///
	/// - [`SerialError::Config`] if the configuration can't be expressed.
	/// - [`SerialError::Io`] if the OS fails to open, or configure the device.
	fn open(path: &Path, config: &LineConfig) -> Result<Self, SerialError>;

	/// Translate a read timeout policy into its native form, without touching
	/// any device.
	///
	/// ## Errors
	///
	/// If the policy can't be expressed by this backend.
	fn translate_timeout(timeout: ReadTimeout) -> Result<Self::Timeout, ConfigError>;

	/// Commit a translated timeout, keeping the committed line configuration
	/// exactly as it was.
	///
	/// ## Errors
	///
	/// If the OS rejects the new settings.
	fn commit_timeout(&self, timeout: Self::Timeout) -> IoResult<()>;

	/// Read into `buff` under the committed timeout policy.
	///
	/// ## Errors
	///
	/// If the OS returns an error reading.
	fn read(&self, buff: &mut [u8]) -> IoResult<isize>;

	/// Write some prefix of `buff`.
	///
	/// ## Errors
	///
	/// If the OS returns an error writing.
	fn write(&self, buff: &[u8]) -> IoResult<isize>;

	/// Block until all written data has been transmitted.
	///
	/// ## Errors
	///
	/// If the OS returns an error waiting for the output to drain.
	fn flush(&self) -> IoResult<()>;

	/// Invalidate this port, waking up any call blocked on it.
	///
	/// Must be safe to call from any thread, at any time, any number of times.
	/// The OS resource itself is released when the port is dropped.
	fn shutdown(&self);
}
