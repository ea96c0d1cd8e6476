//! Pseudo terminal helpers shared between the integration tests.

#![allow(dead_code)]

use std::{
	ffi::CStr,
	fs::OpenOptions,
	os::{
		fd::{AsRawFd, FromRawFd, OwnedFd},
		unix::fs::OpenOptionsExt,
	},
	path::{Path, PathBuf},
	time::{Duration, Instant},
};
use serial_line::{SerialDevice, SerialError, TimedRead};

/// The master side of a pseudo terminal, and the path of its slave.
///
/// The slave reports a hangup once the master is dropped, so keep this alive
/// for as long as the slave is in use.
pub struct PtyPair {
	pub master: OwnedFd,
	pub slave_path: PathBuf,
}

/// Allocate a new pseudo terminal.
pub fn open_pty() -> PtyPair {
	unsafe {
		let raw_master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
		assert!(
			raw_master >= 0,
			"posix_openpt failed: {}",
			std::io::Error::last_os_error(),
		);
		let master = OwnedFd::from_raw_fd(raw_master);
		assert_eq!(libc::grantpt(master.as_raw_fd()), 0, "grantpt failed");
		assert_eq!(libc::unlockpt(master.as_raw_fd()), 0, "unlockpt failed");

		let mut name = [0 as libc::c_char; 128];
		assert_eq!(
			libc::ptsname_r(master.as_raw_fd(), name.as_mut_ptr(), name.len()),
			0,
			"ptsname_r failed",
		);
		let slave_path = PathBuf::from(
			CStr::from_ptr(name.as_ptr())
				.to_str()
				.expect("Slave path was not UTF-8?"),
		);

		PtyPair { master, slave_path }
	}
}

/// The line settings a terminal currently has, as seen through a separate
/// descriptor: `(c_cflag, output speed)`.
pub fn line_settings_of(path: &Path) -> (libc::tcflag_t, libc::speed_t) {
	let fd = OpenOptions::new()
		.read(true)
		.write(true)
		.custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
		.open(path)
		.expect("Failed to open a second descriptor to the terminal");
	unsafe {
		let mut termios: libc::termios = std::mem::zeroed();
		assert_eq!(
			libc::tcgetattr(fd.as_raw_fd(), &mut termios),
			0,
			"tcgetattr failed: {}",
			std::io::Error::last_os_error(),
		);
		(termios.c_cflag, libc::cfgetospeed(&termios))
	}
}

/// Read exactly `expected` bytes through timed reads, giving up after
/// `deadline`.
pub fn read_exactly(
	reader: &mut impl TimedRead,
	expected: usize,
	deadline: Duration,
) -> Result<Vec<u8>, SerialError> {
	let started = Instant::now();
	let mut received = Vec::with_capacity(expected);
	let mut buff = [0_u8; 512];

	while received.len() < expected {
		assert!(
			started.elapsed() < deadline,
			"Only received {} of {expected} bytes before the deadline",
			received.len(),
		);
		let wanted = (expected - received.len()).min(buff.len());
		let read = reader.timed_read(&mut buff[..wanted])?;
		received.extend_from_slice(&buff[..read]);
	}

	Ok(received)
}

/// Largest slice handed to a single write by [`write_in_pieces`].
pub const MAX_PIECE: usize = 4096;

/// Write all of `payload` with single writes of at most [`MAX_PIECE`]
/// bytes, looping over partial ones. Returns how many writes it took.
pub fn write_in_pieces<P: serial_line::NativePort>(
	device: &SerialDevice<P>,
	payload: &[u8],
) -> Result<usize, SerialError> {
	let mut remaining = payload;
	let mut calls = 0;
	while !remaining.is_empty() {
		let piece = remaining.len().min(MAX_PIECE);
		let written = device.write(&remaining[..piece])?;
		assert_ne!(written, 0, "Device stopped accepting data");
		remaining = &remaining[written..];
		calls += 1;
	}
	Ok(calls)
}
