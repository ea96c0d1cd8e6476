//! Send data between two serial ports that are wired to each other, and check
//! it arrives intact.
//!
//! This is meant for null-modem pairs, either real cables or virtual ones
//! like com0com on windows, or `socat` pseudo terminals on unix.

use crate::exit_codes::{LOOPBACK_IO_FAILURE, LOOPBACK_MISMATCH};
use miette::{miette, Report};
use serial_line::{
	ReadTimeout, SerialDevice, SerialError, TimedRead, TimedReader, DEFAULT_TIMED_READ_MS,
};
use std::{
	io::Error as IoError,
	thread,
	time::{Duration, Instant},
};
use tracing::{error, info, warn};

/// Worst case bits on the wire per byte: start, 8 data, parity, 2 stop.
const WORST_CASE_BITS_PER_BYTE: u64 = 12;
/// Slack on top of the time the line itself needs.
const TRANSFER_GRACE: Duration = Duration::from_secs(2);

/// The outcome of sending one payload in one direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundTrip {
	pub size: usize,
	pub received: usize,
	/// Index of the first byte that didn't match, if any.
	pub first_difference: Option<usize>,
	pub elapsed: Duration,
	/// The writer was still stuck when the deadline passed, so the sending
	/// device got closed to wake it up.
	pub writer_stalled: bool,
}

impl RoundTrip {
	#[must_use]
	pub const fn is_intact(&self) -> bool {
		self.received == self.size && self.first_difference.is_none() && !self.writer_stalled
	}
}

pub fn handle_loopback(
	use_json: bool,
	port_a: &SerialDevice,
	port_b: &SerialDevice,
	timeout: ReadTimeout,
	sizes: &[usize],
) {
	// A lost byte should fail the test, not hang it.
	let timeout = if timeout == ReadTimeout::Blocking {
		ReadTimeout::from_millis(DEFAULT_TIMED_READ_MS)
	} else {
		timeout
	};
	let mut failed = 0_usize;

	'sizes: for &size in sizes {
		for (from, to) in [(port_a, port_b), (port_b, port_a)] {
			let deadline = transfer_deadline(size, from.line_config().baud_rate);
			let result = match round_trip(from, to, size, timeout, deadline) {
				Ok(result) => result,
				Err(cause) => {
					if use_json {
						error!(
							id = "serialctl::loopback::io_failure",
							?cause,
							from = %from.path().display(),
							to = %to.path().display(),
							size,
							"serial port failed during loopback",
						);
					} else {
						error!(
							"\n{:?}",
							Report::new(cause).wrap_err(miette!(
								help = "Make sure nothing else has either serial port open.",
								"Serial port failed while sending {size} bytes from {} to {}",
								from.path().display(),
								to.path().display(),
							)),
						);
					}

					std::process::exit(LOOPBACK_IO_FAILURE);
				}
			};

			if result.is_intact() {
				if use_json {
					info!(
						id = "serialctl::loopback::intact",
						from = %from.path().display(),
						to = %to.path().display(),
						size,
						elapsed_ms = result.elapsed.as_millis(),
						"payload arrived intact",
					);
				} else {
					info!(
						from = %from.path().display(),
						to = %to.path().display(),
						elapsed = ?result.elapsed,
						"{size} bytes arrived intact.",
					);
				}
			} else {
				failed += 1;
				if use_json {
					warn!(
						id = "serialctl::loopback::mismatch",
						from = %from.path().display(),
						to = %to.path().display(),
						size,
						received = result.received,
						first_difference = ?result.first_difference,
						"payload did not arrive intact",
					);
				} else {
					warn!(
						from = %from.path().display(),
						to = %to.path().display(),
						received = result.received,
						first_difference = ?result.first_difference,
						"{size} bytes were sent, but did not arrive intact!",
					);
				}

				if result.writer_stalled {
					if use_json {
						warn!(
							id = "serialctl::loopback::writer_stalled",
							from = %from.path().display(),
							"nothing drained the sending port, stopping",
						);
					} else {
						warn!(
							from = %from.path().display(),
							"Nothing drained the sending port so it had to be closed, skipping the remaining transfers.",
						);
					}
					break 'sizes;
				}
			}
		}
	}

	if failed != 0 {
		if use_json {
			error!(
				id = "serialctl::loopback::failed",
				failed,
				"loopback test failed"
			);
		} else {
			error!(
				"\n{:?}",
				miette!(
					help = "Check that both ports use the same line settings, and are actually wired to each other.",
					"{failed} loopback transfer(s) did not arrive intact.",
				),
			);
		}

		std::process::exit(LOOPBACK_MISMATCH);
	}
}

/// Send `size` bytes from one device, and read them back on the other.
///
/// The write happens on its own thread, so payloads larger than the OS
/// buffers don't deadlock. If the payload hasn't fully arrived by
/// `deadline` while the writer is still blocked, `from` gets closed so the
/// writer wakes up; `from` is unusable afterwards.
///
/// ## Errors
///
/// If either device fails while reading, or writing. Bytes not arriving
/// before `deadline` is not an error, it's reported in the [`RoundTrip`].
pub fn round_trip(
	from: &SerialDevice,
	to: &SerialDevice,
	size: usize,
	timeout: ReadTimeout,
	deadline: Duration,
) -> Result<RoundTrip, SerialError> {
	let payload = loopback_payload(size);
	let started = Instant::now();

	let (received, writer_stalled) = thread::scope(|scope| {
		let writer = scope.spawn(|| from.write_all(&payload));
		let received = receive(to, size, timeout, deadline);

		let incomplete = received.as_ref().map_or(true, |bytes| bytes.len() < size);
		let writer_stalled = incomplete && !writer.is_finished();
		if writer_stalled {
			from.close();
		}

		let written = writer.join().unwrap_or_else(|_| {
			Err(SerialError::Io(IoError::other("loopback writer thread panicked")))
		});
		match written {
			// We closed the device out from under it.
			Err(SerialError::Eof) if writer_stalled => {}
			other => other?,
		}
		received.map(|bytes| (bytes, writer_stalled))
	})?;

	Ok(RoundTrip {
		size,
		received: received.len(),
		first_difference: first_difference(&payload, &received),
		elapsed: started.elapsed(),
		writer_stalled,
	})
}

fn receive(
	device: &SerialDevice,
	size: usize,
	timeout: ReadTimeout,
	deadline: Duration,
) -> Result<Vec<u8>, SerialError> {
	let started = Instant::now();
	let mut reader = TimedReader::new(device, timeout);
	let mut received = Vec::with_capacity(size);
	let mut buff = [0_u8; 1024];

	while received.len() < size && started.elapsed() < deadline {
		let wanted = (size - received.len()).min(buff.len());
		let read = reader.timed_read(&mut buff[..wanted])?;
		received.extend_from_slice(&buff[..read]);
	}

	Ok(received)
}

/// A payload that makes dropped, duplicated, or reordered bytes obvious.
///
/// Uses a prime length cycle so it never lines up with buffer sizes.
#[must_use]
pub fn loopback_payload(size: usize) -> Vec<u8> {
	(0..size)
		.map(|idx| u8::try_from(idx % 251).unwrap_or_default())
		.collect()
}

/// How long a payload of `size` bytes may take to arrive at `baud_rate`.
#[must_use]
pub fn transfer_deadline(size: usize, baud_rate: u32) -> Duration {
	let bits = u64::try_from(size)
		.unwrap_or(u64::MAX)
		.saturating_mul(WORST_CASE_BITS_PER_BYTE);
	let line_millis = bits.saturating_mul(1000) / u64::from(baud_rate.max(1));
	// Twice what the line needs, for driver buffering.
	Duration::from_millis(line_millis.saturating_mul(2)) + TRANSFER_GRACE
}

/// Find the first index where two payloads differ, including one being a
/// prefix of the other.
#[must_use]
pub fn first_difference(sent: &[u8], received: &[u8]) -> Option<usize> {
	sent.iter()
		.zip(received)
		.position(|(sent_byte, received_byte)| sent_byte != received_byte)
		.or_else(|| (sent.len() != received.len()).then(|| sent.len().min(received.len())))
}

#[cfg(test)]
mod unit_tests {
	use super::*;

	#[test]
	pub fn payloads_never_repeat_within_a_cycle() {
		let payload = loopback_payload(10_000);
		assert_eq!(payload.len(), 10_000);
		assert_eq!(payload[0], 0);
		assert_eq!(payload[250], 250);
		assert_eq!(payload[251], 0, "Payload should cycle every 251 bytes");
		assert!(loopback_payload(0).is_empty());
	}

	#[test]
	pub fn deadlines_scale_with_baud_rate() {
		assert_eq!(transfer_deadline(0, 9600), TRANSFER_GRACE);
		// 10000 bytes * 12 bits at 9600 baud is 12.5s on the wire.
		assert_eq!(
			transfer_deadline(10_000, 9600),
			Duration::from_millis(25_000) + TRANSFER_GRACE,
		);
		assert!(transfer_deadline(10_000, 115_200) < transfer_deadline(10_000, 9600));
		// Never divides by zero.
		assert!(transfer_deadline(1, 0) > TRANSFER_GRACE);
	}

	#[test]
	pub fn differences() {
		assert_eq!(first_difference(b"abc", b"abc"), None);
		assert_eq!(first_difference(b"abc", b"abd"), Some(2));
		assert_eq!(first_difference(b"abc", b"ab"), Some(2), "Missing bytes count");
		assert_eq!(first_difference(b"ab", b"abc"), Some(2), "Extra bytes count");
		assert_eq!(first_difference(b"", b""), None);
	}

	#[test]
	pub fn intact_needs_everything() {
		let mut result = RoundTrip {
			size: 3,
			received: 3,
			first_difference: None,
			elapsed: Duration::ZERO,
			writer_stalled: false,
		};
		assert!(result.is_intact());
		result.received = 2;
		assert!(!result.is_intact());
		result.received = 3;
		result.first_difference = Some(1);
		assert!(!result.is_intact());
		result.first_difference = None;
		result.writer_stalled = true;
		assert!(!result.is_intact());
	}

	/// Allocate a pseudo terminal, returning its master, and slave path.
	#[cfg(target_os = "linux")]
	fn open_pty() -> (std::os::fd::OwnedFd, std::path::PathBuf) {
		use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

		unsafe {
			let raw_master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
			assert!(raw_master >= 0, "posix_openpt failed");
			let master = OwnedFd::from_raw_fd(raw_master);
			assert_eq!(libc::grantpt(master.as_raw_fd()), 0, "grantpt failed");
			assert_eq!(libc::unlockpt(master.as_raw_fd()), 0, "unlockpt failed");

			let mut name = [0 as libc::c_char; 128];
			assert_eq!(
				libc::ptsname_r(master.as_raw_fd(), name.as_mut_ptr(), name.len()),
				0,
				"ptsname_r failed",
			);
			let slave_path = std::ffi::CStr::from_ptr(name.as_ptr())
				.to_str()
				.expect("Slave path was not UTF-8?")
				.into();
			(master, slave_path)
		}
	}

	#[cfg(target_os = "linux")]
	#[test]
	pub fn undrained_writers_do_not_hang_the_round_trip() {
		use serial_line::LineConfig;

		// Two unrelated pseudo terminals, nobody ever reads the sending
		// side's master, so a large write blocks forever.
		let (_sending_master, sending_path) = open_pty();
		let (_receiving_master, receiving_path) = open_pty();
		let from = SerialDevice::open(&sending_path, &LineConfig::default())
			.expect("Failed to open sending slave");
		let to = SerialDevice::open(&receiving_path, &LineConfig::default())
			.expect("Failed to open receiving slave");

		let started = Instant::now();
		let result = round_trip(
			&from,
			&to,
			1024 * 1024,
			ReadTimeout::from_millis(100),
			Duration::from_millis(500),
		)
		.expect("A stalled writer should be reported, not be an error");

		assert!(
			started.elapsed() < Duration::from_secs(10),
			"Round trip hung for: {:?}",
			started.elapsed(),
		);
		assert_eq!(result.received, 0);
		assert!(result.writer_stalled);
		assert!(!result.is_intact());
		assert!(from.is_closed(), "The sending device should have been closed");
		assert!(!to.is_closed());
	}
}
