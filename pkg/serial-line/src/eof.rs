//! Turns raw OS errors into [`SerialError`]s.
//!
//! Every result a backend hands back flows through here. The one special case
//! is the "this handle no longer refers to a live device" error code
//! ([`DEVICE_INVALIDATED`]), which always becomes [`SerialError::Eof`], so a
//! closed device looks the same no matter which platform, or which call,
//! noticed it.

use crate::{errors::SerialError, sys::DEVICE_INVALIDATED};
use std::io::{Error as IoError, Result as IoResult};

/// Classify an OS error.
#[must_use]
pub fn normalize(error: IoError) -> SerialError {
	if error.raw_os_error() == Some(DEVICE_INVALIDATED) {
		SerialError::Eof
	} else {
		SerialError::Io(error)
	}
}

/// Classify the result of a native read, or write.
///
/// Negative transfer counts are never reported to a caller, they become `0`.
///
/// ## Errors
///
/// See [`normalize`].
pub fn normalize_transfer(result: IoResult<isize>) -> Result<usize, SerialError> {
	match result {
		Ok(transferred) => Ok(usize::try_from(transferred).unwrap_or_default()),
		Err(cause) => Err(normalize(cause)),
	}
}
