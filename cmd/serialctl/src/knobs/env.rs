//! The list of environment variables that influence behavior for `serialctl`.

use once_cell::sync::Lazy;
use std::{
	env::{var as env_var, var_os as env_var_os},
	path::PathBuf,
};

/// Another way of configuring `serialctl` to output it's data in JSON.
///
/// Environment Variable Name: `SERIALCTL_OUTPUT_JSON`
/// Expected Values: ("1" or "0"), and ("true" or "false")
/// Type: Boolean
pub static USE_JSON_OUTPUT: Lazy<bool> =
	Lazy::new(|| env_var("SERIALCTL_OUTPUT_JSON").map_or(false, |var| is_truthy(&var)));

/// The serial port to use when none is passed on the command line.
///
/// Environment Variable Name: `SERIALCTL_SERIAL_PORT`
/// Expected Values: A path on unix (`/dev/ttyUSB0`), a device name on windows
/// (`COM1`).
/// Type: [`PathBuf`].
pub static SERIALCTL_SERIAL_PORT: Lazy<Option<PathBuf>> =
	Lazy::new(|| env_var_os("SERIALCTL_SERIAL_PORT").map(PathBuf::from));

/// Trace every byte read from, or written to serial ports.
///
/// Only shows up when the log level for `serial_line` is `trace`.
///
/// Environment Variable Name: `SERIALCTL_TRACE_IO`
/// Expected Values: ("1" or "0"), and ("true" or "false")
/// Type: Boolean
pub static TRACE_SERIAL_IO: Lazy<bool> =
	Lazy::new(|| env_var("SERIALCTL_TRACE_IO").map_or(false, |var| is_truthy(&var)));

fn is_truthy(value: &str) -> bool {
	value == "1" || value == "true"
}
