//! Reads that always wait a bounded amount of time.

use crate::{
	device::SerialDevice,
	errors::SerialError,
	sys::{NativePort, PlatformPort},
	timeout::{ReadTimeout, DEFAULT_TIMED_READ_MS},
};

/// Something that can read with a deadline.
///
/// `Ok(0)` means nothing arrived before the deadline, it's never end of
/// stream.
pub trait TimedRead {
	/// Read whatever arrives within this reader's timeout.
	///
	/// ## Errors
	///
	/// If the timeout can't be applied, or the read itself fails.
	fn timed_read(&mut self, buff: &mut [u8]) -> Result<usize, SerialError>;
}

/// Borrows a device, and applies a fixed read timeout before every read.
///
/// The timeout is re-applied on each call, so something else changing the
/// devices timeout in between doesn't leak into these reads.
#[derive(Debug)]
pub struct TimedReader<'device, P: NativePort = PlatformPort> {
	device: &'device SerialDevice<P>,
	timeout: ReadTimeout,
}

impl<'device, P: NativePort> TimedReader<'device, P> {
	#[must_use]
	pub const fn new(device: &'device SerialDevice<P>, timeout: ReadTimeout) -> Self {
		Self { device, timeout }
	}

	/// A reader waiting at most [`DEFAULT_TIMED_READ_MS`] per read.
	#[must_use]
	pub fn with_default(device: &'device SerialDevice<P>) -> Self {
		Self::new(device, ReadTimeout::from_millis(DEFAULT_TIMED_READ_MS))
	}

	#[must_use]
	pub const fn timeout(&self) -> ReadTimeout {
		self.timeout
	}

	#[must_use]
	pub const fn device(&self) -> &'device SerialDevice<P> {
		self.device
	}
}

impl<P: NativePort> TimedRead for TimedReader<'_, P> {
	fn timed_read(&mut self, buff: &mut [u8]) -> Result<usize, SerialError> {
		// A device whose timeout couldn't be applied might block forever.
		self.device.set_read_timeout(self.timeout)?;
		self.device.read(buff)
	}
}
