//! Read timeout policies.
//!
//! A read on a serial device can behave in one of three ways, picked by the
//! sign of a millisecond count:
//!
//! | Request | Policy                     | A read returns...                                   |
//! |---------|----------------------------|-----------------------------------------------------|
//! | `< 0`   | [`ReadTimeout::Blocking`]  | once at least one byte is available, no timeout.    |
//! | `== 0`  | [`ReadTimeout::Poll`]      | immediately, with whatever is available (maybe 0).  |
//! | `> 0`   | [`ReadTimeout::Timed`]     | on the first byte, or after the timeout with 0.     |
//!
//! How precisely a timed read is honored depends on the platform, unix
//! backends can only wait in tenths of a second and always round up.

use std::time::Duration;

/// The read timeout used by [`crate::TimedReader::with_default`].
pub const DEFAULT_TIMED_READ_MS: i64 = 100;

/// How long a single read is allowed to wait for data.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum ReadTimeout {
	/// Block until at least one byte is available.
	#[default]
	Blocking,
	/// Never wait, return whatever is already available.
	Poll,
	/// Wait for the first byte, but at most this long.
	///
	/// Always non-zero when created through [`ReadTimeout::from_millis`].
	Timed(Duration),
}

impl ReadTimeout {
	/// Build a policy from a signed millisecond count.
	#[must_use]
	pub fn from_millis(millis: i64) -> Self {
		match millis {
			ms if ms < 0 => Self::Blocking,
			0 => Self::Poll,
			ms => Self::Timed(Duration::from_millis(ms.unsigned_abs())),
		}
	}

	/// Turn this policy back into a signed millisecond count.
	///
	/// Timed policies saturate at [`i64::MAX`].
	#[must_use]
	pub fn as_millis(&self) -> i64 {
		match self {
			Self::Blocking => -1,
			Self::Poll => 0,
			Self::Timed(timeout) => i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX),
		}
	}
}

impl From<Duration> for ReadTimeout {
	/// A zero duration is a poll, anything else is a timed read.
	fn from(value: Duration) -> Self {
		if value.is_zero() {
			Self::Poll
		} else {
			Self::Timed(value)
		}
	}
}
