//! The handle you actually talk to a serial device through.

use crate::{
	config::LineConfig,
	eof::{normalize, normalize_transfer},
	errors::SerialError,
	sys::{NativePort, PlatformPort},
	timeout::ReadTimeout,
};
use std::{
	io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult, Write},
	path::{Path, PathBuf},
	sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, trace};

#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd};

/// Per device diagnostic switches.
///
/// Unlike a process wide toggle these only ever affect the device they were
/// passed to.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Diagnostics {
	/// Emit a `trace` event with the bytes of every read, and write.
	pub trace_io: bool,
}

/// An open serial device.
///
/// Every operation takes `&self`, so a device can be shared between threads
/// (e.g. one thread blocked reading while another writes, or closes). Closing
/// is final: once [`SerialDevice::close`] has been called every operation,
/// including one that was blocked at the time, returns [`SerialError::Eof`].
///
/// The underlying OS resource is released exactly once, when the last
/// in-flight operation that still references it has finished.
pub struct SerialDevice<P: NativePort = PlatformPort> {
	/// `None` once closed.
	slot: Mutex<Option<Arc<P>>>,
	path: PathBuf,
	config: LineConfig,
	diagnostics: Diagnostics,
}

impl SerialDevice<PlatformPort> {
	/// Open, and configure a serial device by path or name.
	///
	/// On Unix systems, `path` must be a path to a TTY device. On Windows, it
	/// must be the name of a COM device, such as COM1, COM2, etc. The win32
	/// device namespace is used automatically, so COM ports above COM9 work.
	///
	/// The device starts out with blocking reads.
	///
	/// ## Errors
	///
	/// - [`SerialError::Config`] if this platform can't express `config`.
	/// - [`SerialError::Io`] if the OS refuses to open, or configure the device.
	pub fn open(path: impl AsRef<Path>, config: &LineConfig) -> Result<Self, SerialError> {
		Self::open_with(path, config, Diagnostics::default())
	}

	/// Same as [`SerialDevice::open`], with diagnostics for this device.
	///
	/// ## Errors
	///
	/// See [`SerialDevice::open`].
	pub fn open_with(
		path: impl AsRef<Path>,
		config: &LineConfig,
		diagnostics: Diagnostics,
	) -> Result<Self, SerialError> {
		Self::open_native(path.as_ref(), config, diagnostics)
	}

	/// Configure an already open terminal descriptor, like the master side
	/// of a pseudo terminal.
	///
	/// The descriptor is owned by the device from here on out, and gets
	/// closed if configuring it fails.
	///
	/// ## Errors
	///
	/// See [`SerialDevice::open`].
	#[cfg(unix)]
	pub fn from_fd(
		fd: OwnedFd,
		config: &LineConfig,
		diagnostics: Diagnostics,
	) -> Result<Self, SerialError> {
		let path = PathBuf::from(format!("/dev/fd/{}", fd.as_raw_fd()));
		let port = PlatformPort::from_fd(fd, config)?;
		debug!(path = %path.display(), %config, "adopted serial device");
		Ok(Self::from_port(port, path, *config, diagnostics))
	}
}

impl<P: NativePort> SerialDevice<P> {
	/// Open a device through a specific backend.
	///
	/// ## Errors
	///
	/// See [`SerialDevice::open`].
	pub fn open_native(
		path: &Path,
		config: &LineConfig,
		diagnostics: Diagnostics,
	) -> Result<Self, SerialError> {
		let port = P::open(path, config).inspect_err(|cause| {
			debug!(path = %path.display(), %config, %cause, "failed to open serial device");
		})?;
		debug!(path = %path.display(), %config, "opened serial device");
		Ok(Self::from_port(port, path.to_path_buf(), *config, diagnostics))
	}

	/// Wrap an already configured native port.
	#[must_use]
	pub fn from_port(port: P, path: PathBuf, config: LineConfig, diagnostics: Diagnostics) -> Self {
		Self {
			slot: Mutex::new(Some(Arc::new(port))),
			path,
			config,
			diagnostics,
		}
	}

	/// The path (or name) this device was opened with.
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// The line configuration this device was opened with.
	#[must_use]
	pub const fn line_config(&self) -> &LineConfig {
		&self.config
	}

	#[must_use]
	pub const fn diagnostics(&self) -> Diagnostics {
		self.diagnostics
	}

	/// If [`SerialDevice::close`] has been called.
	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.slot
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.is_none()
	}

	/// Grab a reference to the live port, without holding the lock for the
	/// duration of the operation.
	fn port(&self) -> Result<Arc<P>, SerialError> {
		self.slot
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.as_ref()
			.map(Arc::clone)
			.ok_or(SerialError::Eof)
	}

	/// Change how long subsequent reads wait for data.
	///
	/// The line configuration stays exactly as it was opened. Takes effect for
	/// every read that starts after this returns.
	///
	/// ## Errors
	///
	/// - [`SerialError::Eof`] if the device has been closed.
	/// - [`SerialError::Config`] if this platform can't express the timeout,
	///   the device is left untouched.
	/// - [`SerialError::Io`] if the OS rejects the new settings.
	pub fn set_read_timeout(&self, timeout: ReadTimeout) -> Result<(), SerialError> {
		let port = self.port()?;
		let native = P::translate_timeout(timeout)?;
		port.commit_timeout(native).map_err(normalize)?;
		trace!(path = %self.path.display(), ?timeout, ?native, "committed read timeout");
		Ok(())
	}

	/// Change how long subsequent reads wait for data, in milliseconds.
	///
	/// A negative value blocks until data arrives, `0` never waits, anything
	/// else waits at most that long (rounded to what the platform can do).
	///
	/// ## Errors
	///
	/// See [`SerialDevice::set_read_timeout`].
	pub fn set_read_timeout_ms(&self, millis: i64) -> Result<(), SerialError> {
		self.set_read_timeout(ReadTimeout::from_millis(millis))
	}

	/// Read bytes from the device under the current read timeout.
	///
	/// `Ok(0)` means the timeout ran out (or a poll found nothing), it is
	/// *not* end of stream. End of stream is always [`SerialError::Eof`].
	///
	/// There are no guarantees on which thread receives what data when multiple
	/// threads are reading from the device at once.
	///
	/// ## Errors
	///
	/// - [`SerialError::Eof`] if the device has been closed, or gets closed
	///   while this read is waiting.
	/// - [`SerialError::Io`] if we get any other error back from the OS.
	pub fn read(&self, buff: &mut [u8]) -> Result<usize, SerialError> {
		let port = self.port()?;
		let read = normalize_transfer(port.read(buff))?;
		if self.diagnostics.trace_io {
			trace!(path = %self.path.display(), bytes = read, data = ?&buff[..read.min(buff.len())], "serial read");
		}
		Ok(read)
	}

	/// Write some prefix of `buff` to the device, returning how many bytes
	/// were accepted.
	///
	/// ## Errors
	///
	/// - [`SerialError::Eof`] if the device has been closed.
	/// - [`SerialError::Io`] if we get any other error back from the OS.
	pub fn write(&self, buff: &[u8]) -> Result<usize, SerialError> {
		let port = self.port()?;
		let written = normalize_transfer(port.write(buff))?;
		if self.diagnostics.trace_io {
			trace!(path = %self.path.display(), bytes = written, data = ?&buff[..written.min(buff.len())], "serial write");
		}
		Ok(written)
	}

	/// Write all of `buff`, looping over partial writes.
	///
	/// If this returns an error some of the data may have been written
	/// already.
	///
	/// ## Errors
	///
	/// - See [`SerialDevice::write`].
	/// - [`SerialError::Io`] with [`IoErrorKind::WriteZero`] if the device
	///   stops accepting data.
	pub fn write_all(&self, buff: &[u8]) -> Result<(), SerialError> {
		let mut working_buff = buff;

		while !working_buff.is_empty() {
			match self.write(working_buff)? {
				0 => {
					return Err(SerialError::Io(IoError::new(
						IoErrorKind::WriteZero,
						"failed to write whole buffer",
					)))
				}
				written => working_buff = &working_buff[written..],
			}
		}

		Ok(())
	}

	/// Wait until everything written has been transmitted.
	///
	/// ## Errors
	///
	/// - [`SerialError::Eof`] if the device has been closed.
	/// - [`SerialError::Io`] if we get any other error back from the OS.
	pub fn flush(&self) -> Result<(), SerialError> {
		let port = self.port()?;
		port.flush().map_err(normalize)
	}

	/// Close the device.
	///
	/// Calling this more than once is fine, only the first call does anything.
	/// Any operation currently blocked on the device gets woken up, and
	/// returns [`SerialError::Eof`].
	pub fn close(&self) {
		let taken = self
			.slot
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();

		if let Some(port) = taken {
			port.shutdown();
			debug!(path = %self.path.display(), "closed serial device");
		}
	}
}

impl<P: NativePort> Drop for SerialDevice<P> {
	fn drop(&mut self) {
		self.close();
	}
}

impl<P: NativePort> std::fmt::Debug for SerialDevice<P> {
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		fmt.debug_struct("SerialDevice")
			.field("path", &self.path)
			.field("config", &self.config)
			.field("diagnostics", &self.diagnostics)
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl<P: NativePort> Write for &SerialDevice<P> {
	fn write(&mut self, buff: &[u8]) -> IoResult<usize> {
		SerialDevice::write(*self, buff).map_err(IoError::from)
	}

	fn flush(&mut self) -> IoResult<()> {
		SerialDevice::flush(*self).map_err(IoError::from)
	}
}

impl<P: NativePort> Write for SerialDevice<P> {
	fn write(&mut self, buff: &[u8]) -> IoResult<usize> {
		SerialDevice::write(self, buff).map_err(IoError::from)
	}

	fn flush(&mut self) -> IoResult<()> {
		SerialDevice::flush(self).map_err(IoError::from)
	}
}


#[cfg(test)]
mod unit_tests {
	use super::{test_helpers::*, *};
	use std::{
		sync::atomic::Ordering,
		thread,
		time::{Duration, Instant},
	};

	#[test]
	pub fn reads_and_writes_go_through() {
		let device = mock_device(MockPort::with_incoming(b"hello"));
		let mut buff = [0_u8; 16];
		assert_eq!(device.read(&mut buff).expect("read failed"), 5);
		assert_eq!(&buff[..5], b"hello");

		device.write_all(b"world").expect("write failed");
		device.flush().expect("flush failed");
	}

	#[test]
	pub fn write_all_loops_over_partial_writes() {
		let device = mock_device(MockPort {
			write_limit: Some(3),
			..Default::default()
		});
		let payload = (0..=255_u8).collect::<Vec<_>>();
		device.write_all(&payload).expect("write_all failed");

		let port = device.port().expect("device is open");
		assert_eq!(*port.outgoing.lock().expect("poisoned"), payload);
	}

	#[test]
	pub fn write_all_reports_a_stalled_device() {
		let device = mock_device(MockPort {
			write_limit: Some(0),
			..Default::default()
		});
		match device.write_all(b"abc") {
			Err(SerialError::Io(cause)) => assert_eq!(cause.kind(), IoErrorKind::WriteZero),
			other => panic!("Expected a WriteZero error, got: {other:?}"),
		}
		// An empty buffer never needs a write at all.
		device.write_all(&[]).expect("empty write_all should succeed");
	}

	#[test]
	pub fn everything_is_eof_after_close() {
		let device = mock_device(MockPort::with_incoming(b"unread"));
		assert!(!device.is_closed());
		device.close();
		assert!(device.is_closed());

		let mut buff = [0_u8; 4];
		assert!(device.read(&mut buff).expect_err("read after close").is_eof());
		assert!(device.write(b"x").expect_err("write after close").is_eof());
		assert!(device.write_all(b"x").expect_err("write_all after close").is_eof());
		assert!(device.flush().expect_err("flush after close").is_eof());
		assert!(device
			.set_read_timeout(ReadTimeout::Poll)
			.expect_err("timeout after close")
			.is_eof());
	}

	#[test]
	pub fn close_is_idempotent() {
		let device = mock_device(MockPort::default());
		let port = device.port().expect("device is open");
		device.close();
		device.close();
		drop(device);
		assert_eq!(
			port.shutdown_calls.load(Ordering::SeqCst),
			1,
			"The native port should only ever be shut down once",
		);
	}

	#[test]
	pub fn in_flight_reads_keep_the_port_alive() {
		let device = mock_device(MockPort::default());
		let in_flight = device.port().expect("device is open");
		device.close();
		// The OS resource is only released with the last reference.
		assert_eq!(Arc::strong_count(&in_flight), 1);
		assert!(in_flight.is_shutdown.load(Ordering::SeqCst));
	}

	#[test]
	pub fn close_wakes_a_blocked_read() {
		let device = mock_device(MockPort::default());
		device
			.set_read_timeout(ReadTimeout::Blocking)
			.expect("failed to set blocking");

		thread::scope(|scope| {
			let reader = scope.spawn(|| {
				let mut buff = [0_u8; 8];
				device.read(&mut buff)
			});
			thread::sleep(Duration::from_millis(50));
			let started_close = Instant::now();
			device.close();

			let result = reader.join().expect("reader panicked");
			assert!(
				result.expect_err("blocked read must fail after close").is_eof(),
				"A read blocked during close must report end of stream",
			);
			assert!(started_close.elapsed() < Duration::from_secs(5));
		});
	}

	#[test]
	pub fn timeouts_are_committed_to_the_port() {
		let device = mock_device(MockPort::default());
		device.set_read_timeout_ms(0).expect("poll should commit");
		device.set_read_timeout_ms(250).expect("timed should commit");
		device.set_read_timeout_ms(-5).expect("blocking should commit");

		let port = device.port().expect("device is open");
		assert_eq!(
			*port.committed.lock().expect("poisoned"),
			vec![
				ReadTimeout::Poll,
				ReadTimeout::Timed(Duration::from_millis(250)),
				ReadTimeout::Blocking,
			],
		);
	}

	#[test]
	pub fn untranslatable_timeouts_change_nothing() {
		let device = mock_device(MockPort::default());
		assert!(matches!(
			device.set_read_timeout_ms(120_000),
			Err(SerialError::Config(_)),
		));
		let port = device.port().expect("device is open");
		assert!(port.committed.lock().expect("poisoned").is_empty());
	}

	#[test]
	pub fn poll_read_returns_zero_without_data() {
		let device = mock_device(MockPort::default());
		device.set_read_timeout(ReadTimeout::Poll).expect("poll");
		let mut buff = [0_u8; 8];
		assert_eq!(device.read(&mut buff).expect("poll read should succeed"), 0);
	}

	#[test]
	pub fn open_failures_are_reported() {
		let result = SerialDevice::<MockPort>::open_native(
			Path::new("/missing/ttyS0"),
			&LineConfig::default(),
			Diagnostics::default(),
		);
		assert!(matches!(result, Err(SerialError::Io(_))));

		let result = SerialDevice::<MockPort>::open_native(
			Path::new("/dev/ttyS0"),
			&LineConfig::default().with_data_bits(9),
			Diagnostics::default(),
		);
		assert!(matches!(result, Err(SerialError::Config(_))));

		let device = SerialDevice::<MockPort>::open_native(
			Path::new("/dev/ttyS0"),
			&LineConfig::default(),
			Diagnostics { trace_io: true },
		)
		.expect("mock open should succeed");
		assert_eq!(device.path(), Path::new("/dev/ttyS0"));
		assert_eq!(device.line_config(), &LineConfig::default());
		assert!(device.diagnostics().trace_io);
	}

	#[test]
	pub fn std_write_maps_eof() {
		let device = mock_device(MockPort::default());
		let mut writer = &device;
		Write::write_all(&mut writer, b"via std").expect("std write failed");
		device.close();
		let error = Write::write(&mut writer, b"more").expect_err("std write after close should fail");
		assert_eq!(error.kind(), IoErrorKind::UnexpectedEof);
	}
}
