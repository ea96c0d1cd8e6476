//! Thin wrapper around the termios APIs for talking to a serial port on unix
//! like systems.
//!
//! The descriptor is kept non-blocking, and every read/write first polls the
//! descriptor together with a private wake-up pipe. The wait a read polls for
//! is derived from the `VMIN`/`VTIME` values that were last committed to the
//! device, so it always has the same (decisecond) granularity the terminal
//! driver has. Writing a byte into the wake-up pipe is how
//! [`RawSerialPort::shutdown`] gets a blocked call to return.

use crate::{
	config::{LineConfig, Parity, StopBits},
	eof::normalize,
	errors::{ConfigError, SerialError},
	sys::NativePort,
	timeout::ReadTimeout,
};
use libc::{O_NOCTTY, O_NONBLOCK};
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	fs::{File, OpenOptions},
	io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult},
	os::{
		fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
		raw::{c_int, c_short},
		unix::fs::OpenOptionsExt,
	},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex, PoisonError,
	},
};
use tracing::debug;

pub type RawTermios = libc::termios;

/// `EBADF`, the descriptor does not refer to an open file anymore.
pub const DEVICE_INVALIDATED: i32 = libc::EBADF;

/// Length of one `VTIME` unit in milliseconds.
const VTIME_UNIT_MS: u128 = 100;

/// Speeds every supported unix knows about.
const COMMON_BAUD_RATES: &[(u32, libc::speed_t)] = &[
	(50, libc::B50),
	(75, libc::B75),
	(110, libc::B110),
	(134, libc::B134),
	(150, libc::B150),
	(200, libc::B200),
	(300, libc::B300),
	(600, libc::B600),
	(1200, libc::B1200),
	(1800, libc::B1800),
	(2400, libc::B2400),
	(4800, libc::B4800),
	(9600, libc::B9600),
	(19200, libc::B19200),
	(38400, libc::B38400),
	(57600, libc::B57600),
	(115_200, libc::B115200),
	(230_400, libc::B230400),
];

#[cfg(any(target_os = "android", target_os = "linux"))]
const EXTENDED_BAUD_RATES: &[(u32, libc::speed_t)] = &[
	(460_800, libc::B460800),
	(500_000, libc::B500000),
	(576_000, libc::B576000),
	(921_600, libc::B921600),
	(1_000_000, libc::B1000000),
	(1_152_000, libc::B1152000),
	(1_500_000, libc::B1500000),
	(2_000_000, libc::B2000000),
	(2_500_000, libc::B2500000),
	(3_000_000, libc::B3000000),
	(3_500_000, libc::B3500000),
	(4_000_000, libc::B4000000),
];
#[cfg(not(any(target_os = "android", target_os = "linux")))]
const EXTENDED_BAUD_RATES: &[(u32, libc::speed_t)] = &[];

/// The `VMIN`/`VTIME` pair a read policy maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermiosTimeout {
	/// Minimum amount of bytes a read waits for.
	pub vmin: libc::cc_t,
	/// Time a read waits, in tenths of a second.
	pub vtime: libc::cc_t,
}

impl TermiosTimeout {
	/// How long to poll before reading, `-1` meaning forever.
	fn poll_timeout_ms(self) -> c_int {
		if self.vmin > 0 {
			-1
		} else {
			c_int::from(self.vtime) * 100
		}
	}

	fn of(termios: &RawTermios) -> Self {
		Self {
			vmin: termios.c_cc[libc::VMIN],
			vtime: termios.c_cc[libc::VTIME],
		}
	}

	fn apply_to(self, termios: &mut RawTermios) {
		termios.c_cc[libc::VMIN] = self.vmin;
		termios.c_cc[libc::VTIME] = self.vtime;
	}
}

/// Look up the native speed constant for a baud rate.
fn native_speed(baud_rate: u32) -> Option<libc::speed_t> {
	COMMON_BAUD_RATES
		.iter()
		.chain(EXTENDED_BAUD_RATES)
		.find(|(rate, _)| *rate == baud_rate)
		.map(|(_, speed)| *speed)
}

/// Translate a line configuration on top of the termios a device currently
/// has.
///
/// Nothing is committed to the device here, you get back the termios that
/// should be committed. Besides the line settings this also forces raw mode:
/// no flow control, no echo, no canonical mode, no signals, no character
/// translation in either direction.
///
/// ## Errors
///
/// - If the baud rate is not in the lookup table for this OS.
/// - If the data bits are not 7, or 8.
/// - If one and a half stop bits are requested, termios can't express it.
pub fn translate_line_config(
	base: &RawTermios,
	config: &LineConfig,
) -> Result<RawTermios, ConfigError> {
	let speed = native_speed(config.baud_rate).ok_or(ConfigError::InvalidSpeed(config.baud_rate))?;
	config.check_data_bits()?;
	let two_stop_bits = match config.stop_bits {
		StopBits::One => false,
		StopBits::Two => true,
		StopBits::OnePointFive => {
			return Err(ConfigError::UnsupportedStopBits(StopBits::OnePointFive))
		}
	};

	let mut termios = *base;

	termios.c_cflag &= !libc::CRTSCTS;
	termios.c_cflag |= libc::CREAD | libc::CLOCAL;
	termios.c_lflag &= !(libc::ICANON
		| libc::ECHO
		| libc::ECHOE
		| libc::ECHOK
		| libc::ECHONL
		| libc::ECHOCTL
		| libc::ECHOPRT
		| libc::ECHOKE
		| libc::ISIG
		| libc::IEXTEN);
	termios.c_iflag &= !(libc::IXON
		| libc::IXOFF
		| libc::IXANY
		| libc::IGNPAR
		| libc::PARMRK
		| libc::ISTRIP
		| libc::IGNBRK
		| libc::BRKINT
		| libc::INLCR
		| libc::IGNCR
		| libc::ICRNL);
	#[cfg(any(target_os = "android", target_os = "linux"))]
	{
		termios.c_iflag &= !libc::IUCLC;
	}
	termios.c_oflag &= !libc::OPOST;

	termios.c_cflag = (termios.c_cflag & !libc::CSIZE)
		| if config.data_bits == 7 {
			libc::CS7
		} else {
			libc::CS8
		};

	if two_stop_bits {
		termios.c_cflag |= libc::CSTOPB;
	} else {
		termios.c_cflag &= !libc::CSTOPB;
	}

	// Generation (PARENB) and checking (INPCK) always move together.
	match config.parity {
		Parity::None => {
			termios.c_cflag &= !(libc::PARENB | libc::PARODD);
			termios.c_iflag &= !libc::INPCK;
		}
		Parity::Odd => {
			termios.c_cflag |= libc::PARENB | libc::PARODD;
			termios.c_iflag |= libc::INPCK;
		}
		Parity::Even => {
			termios.c_cflag |= libc::PARENB;
			termios.c_cflag &= !libc::PARODD;
			termios.c_iflag |= libc::INPCK;
		}
	}
	#[cfg(any(target_os = "android", target_os = "linux"))]
	{
		termios.c_cflag &= !libc::CMSPAR;
	}

	unsafe {
		if libc::cfsetispeed(&mut termios, speed) == -1
			|| libc::cfsetospeed(&mut termios, speed) == -1
		{
			return Err(ConfigError::InvalidSpeed(config.baud_rate));
		}
	}

	Ok(termios)
}

/// If the driver kept the character size, parity, stop bits, and speed
/// that were requested.
///
/// An input speed of `B0` means "same as the output speed".
fn line_settings_match(requested: &RawTermios, applied: &RawTermios) -> bool {
	const LINE_FLAGS: libc::tcflag_t = libc::CSIZE | libc::PARENB | libc::PARODD | libc::CSTOPB;

	let (requested_in, requested_out, applied_in, applied_out) = unsafe {
		(
			libc::cfgetispeed(requested),
			libc::cfgetospeed(requested),
			libc::cfgetispeed(applied),
			libc::cfgetospeed(applied),
		)
	};

	requested.c_cflag & LINE_FLAGS == applied.c_cflag & LINE_FLAGS
		&& requested_out == applied_out
		&& (applied_in == requested_in || applied_in == libc::B0)
}

/// Translate a read policy into `VMIN`/`VTIME`.
///
/// Timed reads are rounded *up* to whole tenths of a second, and never end
/// up as zero tenths (which would turn them into a poll). A 50ms request
/// waits up to 100ms.
///
/// ## Errors
///
/// If the timeout is longer than 25.5 seconds, the most `VTIME` can hold.
pub fn translate_timeout(timeout: ReadTimeout) -> Result<TermiosTimeout, ConfigError> {
	match timeout {
		ReadTimeout::Blocking => Ok(TermiosTimeout { vmin: 1, vtime: 0 }),
		ReadTimeout::Poll => Ok(TermiosTimeout { vmin: 0, vtime: 0 }),
		ReadTimeout::Timed(duration) => {
			let millis = duration.as_millis();
			let tenths = millis.div_ceil(VTIME_UNIT_MS).max(1);
			let vtime = libc::cc_t::try_from(tenths).map_err(|_| {
				ConfigError::TimeoutOutOfRange(i64::try_from(millis).unwrap_or(i64::MAX))
			})?;
			Ok(TermiosTimeout { vmin: 0, vtime })
		}
	}
}

pub struct RawSerialPort {
	fd: File,
	/// The termios last committed to `fd`.
	committed: Mutex<RawTermios>,
	wake_reader: OwnedFd,
	wake_writer: OwnedFd,
	is_shutdown: AtomicBool,
}

impl Debug for RawSerialPort {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.debug_struct("RawSerialPort")
			.field("fd", &self.fd.as_raw_fd())
			.field("timeout", &self.committed_timeout())
			.field("is_shutdown", &self.is_shutdown.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}

impl RawSerialPort {
	/// Configure an already open descriptor as a serial port.
	///
	/// The descriptor is taken over, and closed if configuration fails.
	///
	/// ## Errors
	///
	/// - If the configuration can't be expressed.
	/// - If the descriptor is not a terminal, or the OS rejects the settings.
	pub fn from_fd(fd: OwnedFd, config: &LineConfig) -> Result<Self, SerialError> {
		let fd = File::from(fd);
		Self::set_nonblocking(&fd).map_err(normalize)?;

		let base = Self::get_termios_from_fd(&fd).map_err(normalize)?;
		let mut termios = translate_line_config(&base, config)?;
		translate_timeout(ReadTimeout::Blocking)?.apply_to(&mut termios);
		let (wake_reader, wake_writer) = Self::wake_pipe().map_err(normalize)?;

		Self::set_termios_on_fd(&fd, &termios).map_err(normalize)?;
		// `tcsetattr` succeeds if *any* of the settings took, so check what
		// the driver actually kept.
		let applied = Self::get_termios_from_fd(&fd).map_err(normalize)?;
		if !line_settings_match(&termios, &applied) {
			debug!(
				fd = fd.as_raw_fd(),
				%config,
				requested.cflag = termios.c_cflag,
				applied.cflag = applied.c_cflag,
				"device kept different line settings, refusing it",
			);
			// Best effort, the descriptor gets closed either way.
			_ = Self::set_termios_on_fd(&fd, &base);
			return Err(ConfigError::NotApplied(*config).into());
		}
		debug!(fd = fd.as_raw_fd(), %config, "committed line configuration");

		Ok(Self {
			fd,
			committed: Mutex::new(applied),
			wake_reader,
			wake_writer,
			is_shutdown: AtomicBool::new(false),
		})
	}

	/// Wait for the device to become ready for `events`.
	///
	/// Returns `Ok(false)` if the timeout ran out first.
	///
	/// ## Errors
	///
	/// - [`DEVICE_INVALIDATED`] if the port was shutdown before, or during the
	///   wait.
	/// - If `poll` itself fails.
	fn wait_for(&self, events: c_short, timeout_ms: c_int) -> IoResult<bool> {
		self.ensure_live()?;

		let mut poll_fds = [
			libc::pollfd {
				fd: self.fd.as_raw_fd(),
				events,
				revents: 0,
			},
			libc::pollfd {
				fd: self.wake_reader.as_raw_fd(),
				events: libc::POLLIN,
				revents: 0,
			},
		];
		loop {
			let result = unsafe { Self::check(libc::poll(poll_fds.as_mut_ptr(), 2, timeout_ms)) };
			match result {
				Ok(_) => break,
				Err(cause) if cause.raw_os_error() == Some(libc::EINTR) => continue,
				Err(cause) => return Err(cause),
			}
		}

		if poll_fds[1].revents != 0 {
			return Err(IoError::from_raw_os_error(DEVICE_INVALIDATED));
		}
		if poll_fds[0].revents & libc::POLLNVAL != 0 {
			return Err(IoError::from_raw_os_error(libc::EBADF));
		}
		Ok(poll_fds[0].revents != 0)
	}

	fn ensure_live(&self) -> IoResult<()> {
		if self.is_shutdown.load(Ordering::SeqCst) {
			Err(IoError::from_raw_os_error(DEVICE_INVALIDATED))
		} else {
			Ok(())
		}
	}

	fn committed_timeout(&self) -> TermiosTimeout {
		TermiosTimeout::of(&self.committed.lock().unwrap_or_else(PoisonError::into_inner))
	}

	fn set_nonblocking(fd: &File) -> IoResult<()> {
		unsafe {
			let flags = Self::check(libc::fcntl(fd.as_raw_fd(), libc::F_GETFL))?;
			Self::check(libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | O_NONBLOCK))?;
		}
		Ok(())
	}

	/// Create the pipe used to wake blocked calls on shutdown.
	///
	/// Both ends are non-blocking, and close on exec.
	fn wake_pipe() -> IoResult<(OwnedFd, OwnedFd)> {
		let mut fds: [RawFd; 2] = [-1, -1];
		let (reader, writer) = unsafe {
			Self::check(libc::pipe(fds.as_mut_ptr()))?;
			(OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))
		};
		for end in [&reader, &writer] {
			unsafe {
				Self::check(libc::fcntl(end.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
				let flags = Self::check(libc::fcntl(end.as_raw_fd(), libc::F_GETFL))?;
				Self::check(libc::fcntl(end.as_raw_fd(), libc::F_SETFL, flags | O_NONBLOCK))?;
			}
		}
		Ok((reader, writer))
	}

	/// Get the terminal interface flags for a particular file descriptor.
	///
	/// ## Errors
	///
	/// If the descriptor isn't a terminal, or we get an error back from the OS.
	fn get_termios_from_fd(fd: &File) -> IoResult<RawTermios> {
		unsafe {
			let mut termios = std::mem::zeroed();
			Self::check(libc::tcgetattr(fd.as_raw_fd(), &mut termios))?;
			Ok(termios)
		}
	}

	/// Set the terminal interface flags on a file descriptor, effective
	/// immediately.
	fn set_termios_on_fd(fd: &File, termios: &RawTermios) -> IoResult<()> {
		unsafe {
			Self::check(libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, termios))?;
		}
		Ok(())
	}

	/// Check a return code and turn it into an OS Error.
	fn check(ret: c_int) -> IoResult<c_int> {
		if ret == -1 {
			Err(IoError::last_os_error())
		} else {
			Ok(ret)
		}
	}

	/// Check a return size and turn it into an OS Error.
	fn check_isize(ret: isize) -> IoResult<isize> {
		if ret == -1 {
			Err(IoError::last_os_error())
		} else {
			Ok(ret)
		}
	}
}

impl NativePort for RawSerialPort {
	type Timeout = TermiosTimeout;

	fn open(path: &Path, config: &LineConfig) -> Result<Self, SerialError> {
		let fd = OpenOptions::new()
			.read(true)
			.write(true)
			.create(false)
			.custom_flags(O_NONBLOCK | O_NOCTTY)
			.open(path)
			.map_err(normalize)?;
		Self::from_fd(fd.into(), config)
	}

	fn translate_timeout(timeout: ReadTimeout) -> Result<Self::Timeout, ConfigError> {
		translate_timeout(timeout)
	}

	fn commit_timeout(&self, timeout: Self::Timeout) -> IoResult<()> {
		self.ensure_live()?;

		let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
		let mut termios = *committed;
		timeout.apply_to(&mut termios);
		Self::set_termios_on_fd(&self.fd, &termios)?;
		*committed = Self::get_termios_from_fd(&self.fd)?;
		Ok(())
	}

	fn read(&self, buff: &mut [u8]) -> IoResult<isize> {
		let timeout = self.committed_timeout();

		loop {
			if !self.wait_for(libc::POLLIN, timeout.poll_timeout_ms())? {
				return Ok(0);
			}

			match unsafe {
				Self::check_isize(libc::read(
					self.fd.as_raw_fd(),
					buff.as_mut_ptr().cast(),
					buff.len() as _,
				))
			} {
				Ok(size) => return Ok(size),
				Err(cause) => match cause.kind() {
					IoErrorKind::Interrupted => continue,
					IoErrorKind::WouldBlock if timeout.poll_timeout_ms() != 0 => continue,
					IoErrorKind::WouldBlock => return Ok(0),
					_ => return Err(cause),
				},
			}
		}
	}

	fn write(&self, buff: &[u8]) -> IoResult<isize> {
		loop {
			self.wait_for(libc::POLLOUT, -1)?;

			match unsafe {
				Self::check_isize(libc::write(
					self.fd.as_raw_fd(),
					buff.as_ptr().cast(),
					buff.len() as _,
				))
			} {
				Ok(size) => return Ok(size),
				Err(cause) => match cause.kind() {
					IoErrorKind::Interrupted | IoErrorKind::WouldBlock => continue,
					_ => return Err(cause),
				},
			}
		}
	}

	fn flush(&self) -> IoResult<()> {
		self.ensure_live()?;
		unsafe {
			Self::check(libc::tcdrain(self.fd.as_raw_fd()))?;
		}
		Ok(())
	}

	fn shutdown(&self) {
		if self.is_shutdown.swap(true, Ordering::SeqCst) {
			return;
		}

		let wake = [1_u8];
		let written = unsafe {
			libc::write(
				self.wake_writer.as_raw_fd(),
				wake.as_ptr().cast(),
				wake.len(),
			)
		};
		if written != 1 {
			debug!(
				fd = self.fd.as_raw_fd(),
				cause = %IoError::last_os_error(),
				"could not signal wake-up pipe, blocked calls may only notice shutdown on their next wake",
			);
		}
	}
}

/// Enumerate the serial devices on this machine.
///
/// ## Errors
///
/// If we cannot list the directory the devices live in.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn enumerate() -> IoResult<Vec<PathBuf>> {
	use std::os::unix::{ffi::OsStrExt, fs::FileTypeExt};

	let entries = match std::fs::read_dir("/sys/class/tty") {
		Ok(entries) => entries,
		// No sysfs, e.g. inside some containers.
		Err(cause) if cause.kind() == IoErrorKind::NotFound => return Ok(Vec::with_capacity(0)),
		Err(cause) => return Err(cause),
	};

	Ok(entries
		.filter_map(|resulting_entry| {
			let entry = resulting_entry.ok()?;
			let base_name = entry.file_name();

			match base_name.as_bytes().strip_prefix(b"tty") {
				// Bare "tty", or virtual consoles like "tty1".
				Some(b"") | None => return None,
				Some(&[c, ..]) if c.is_ascii_digit() => return None,
				Some(_) => (),
			};
			// Every platform uart gets a ttyS* node, only ones with a real
			// driver are usable.
			if let Ok(driver_override) = std::fs::read(entry.path().join("device/driver_override"))
			{
				if driver_override == b"(null)\n" {
					return None;
				}
			}

			let dev_path = Path::new("/dev").join(&base_name);
			if dev_path.metadata().ok()?.file_type().is_char_device() {
				Some(dev_path)
			} else {
				None
			}
		})
		.collect())
}

/// Enumerate the serial devices on this machine.
///
/// ## Errors
///
/// If we cannot list `/dev`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn enumerate() -> IoResult<Vec<PathBuf>> {
	use std::os::unix::{ffi::OsStrExt, fs::FileTypeExt};

	Ok(std::fs::read_dir("/dev")?
		.filter_map(|resulting_entry| {
			let entry = resulting_entry.ok()?;
			let kind = entry.metadata().ok()?.file_type();
			if kind.is_char_device() && is_tty_name(entry.file_name().as_bytes()) {
				Some(entry.path())
			} else {
				None
			}
		})
		.collect())
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn is_tty_name(name: &[u8]) -> bool {
	name.starts_with(b"tty.") || name.starts_with(b"cu.")
}

#[cfg(any(
	target_os = "dragonfly",
	target_os = "freebsd",
	target_os = "netbsd",
	target_os = "openbsd",
))]
fn is_tty_name(name: &[u8]) -> bool {
	// Anything that looks like a numbered tty/callout device, this will
	// include some pseudo terminals.
	const PREFIXES: [&[u8]; 6] = [b"ttyu", b"cuau", b"ttyU", b"cuaU", b"tty", b"cua"];

	PREFIXES.iter().any(|prefix| {
		name.strip_prefix(*prefix)
			.is_some_and(|suffix| !suffix.is_empty() && suffix.iter().all(u8::is_ascii_digit))
	})
}

#[cfg(test)]
mod unit_tests {
	use super::*;
	use std::time::Duration;

	fn zeroed_termios() -> RawTermios {
		unsafe { std::mem::zeroed() }
	}

	#[test]
	pub fn known_speeds_translate() {
		for rate in [50, 300, 1200, 9600, 19200, 38400, 57600, 115_200, 230_400] {
			let termios = translate_line_config(
				&zeroed_termios(),
				&LineConfig::default().with_baud_rate(rate),
			)
			.unwrap_or_else(|cause| panic!("Baud rate {rate} was rejected: {cause}"));
			let expected = native_speed(rate).expect("Rate missing from lookup table");
			assert_eq!(unsafe { libc::cfgetospeed(&termios) }, expected);
			assert_eq!(unsafe { libc::cfgetispeed(&termios) }, expected);
		}
	}

	#[test]
	pub fn unknown_speeds_are_rejected() {
		for rate in [0, 1, 9601, 31_250, u32::MAX] {
			assert_eq!(
				translate_line_config(
					&zeroed_termios(),
					&LineConfig::default().with_baud_rate(rate),
				)
				.err(),
				Some(ConfigError::InvalidSpeed(rate)),
				"Baud rate {rate} is not in the table, and should be rejected",
			);
		}
	}

	#[test]
	pub fn data_bits_map_to_character_size() {
		let seven =
			translate_line_config(&zeroed_termios(), &LineConfig::default().with_data_bits(7))
				.expect("7 data bits should translate");
		assert_eq!(seven.c_cflag & libc::CSIZE, libc::CS7);
		let eight = translate_line_config(&zeroed_termios(), &LineConfig::default())
			.expect("8 data bits should translate");
		assert_eq!(eight.c_cflag & libc::CSIZE, libc::CS8);
		assert_eq!(
			translate_line_config(&zeroed_termios(), &LineConfig::default().with_data_bits(6))
				.err(),
			Some(ConfigError::InvalidDataBits(6)),
		);
	}

	#[test]
	pub fn parity_generation_and_checking_move_together() {
		let mut base = zeroed_termios();
		base.c_cflag |= libc::PARENB | libc::PARODD;
		base.c_iflag |= libc::INPCK;

		let none =
			translate_line_config(&base, &LineConfig::default()).expect("none should translate");
		assert_eq!(none.c_cflag & (libc::PARENB | libc::PARODD), 0);
		assert_eq!(none.c_iflag & libc::INPCK, 0);

		let odd = translate_line_config(
			&zeroed_termios(),
			&LineConfig::default().with_parity(Parity::Odd),
		)
		.expect("odd should translate");
		assert_eq!(
			odd.c_cflag & (libc::PARENB | libc::PARODD),
			libc::PARENB | libc::PARODD
		);
		assert_eq!(odd.c_iflag & libc::INPCK, libc::INPCK);

		let even = translate_line_config(&base, &LineConfig::default().with_parity(Parity::Even))
			.expect("even should translate");
		assert_eq!(even.c_cflag & (libc::PARENB | libc::PARODD), libc::PARENB);
		assert_eq!(even.c_iflag & libc::INPCK, libc::INPCK);
	}

	#[test]
	pub fn stop_bits() {
		let two = translate_line_config(
			&zeroed_termios(),
			&LineConfig::default().with_stop_bits(StopBits::Two),
		)
		.expect("two stop bits should translate");
		assert_eq!(two.c_cflag & libc::CSTOPB, libc::CSTOPB);

		let mut base = zeroed_termios();
		base.c_cflag |= libc::CSTOPB;
		let one = translate_line_config(&base, &LineConfig::default())
			.expect("one stop bit should translate");
		assert_eq!(one.c_cflag & libc::CSTOPB, 0);

		assert_eq!(
			translate_line_config(
				&zeroed_termios(),
				&LineConfig::default().with_stop_bits(StopBits::OnePointFive),
			)
			.err(),
			Some(ConfigError::UnsupportedStopBits(StopBits::OnePointFive)),
			"termios can't express 1.5 stop bits, it must not be coerced",
		);
	}

	#[test]
	pub fn raw_mode_is_forced() {
		let mut cooked = zeroed_termios();
		cooked.c_lflag |= libc::ICANON | libc::ECHO | libc::ISIG | libc::IEXTEN;
		cooked.c_iflag |= libc::IXON | libc::IXOFF | libc::ICRNL | libc::ISTRIP;
		cooked.c_oflag |= libc::OPOST;
		cooked.c_cflag |= libc::CRTSCTS;
		cooked.c_cc[libc::VINTR] = 3;

		let raw = translate_line_config(&cooked, &LineConfig::default())
			.expect("default config should translate");
		assert_eq!(
			raw.c_lflag & (libc::ICANON | libc::ECHO | libc::ISIG | libc::IEXTEN),
			0
		);
		assert_eq!(
			raw.c_iflag & (libc::IXON | libc::IXOFF | libc::ICRNL | libc::ISTRIP),
			0
		);
		assert_eq!(raw.c_oflag & libc::OPOST, 0);
		assert_eq!(raw.c_cflag & libc::CRTSCTS, 0);
		assert_eq!(
			raw.c_cflag & (libc::CREAD | libc::CLOCAL),
			libc::CREAD | libc::CLOCAL
		);
		// Untouched fields carry over from the base.
		assert_eq!(raw.c_cc[libc::VINTR], 3);
	}

	#[test]
	pub fn rejected_config_leaves_base_alone() {
		let mut base = zeroed_termios();
		base.c_lflag |= libc::ECHO;
		let before = base.c_lflag;
		assert!(translate_line_config(
			&base,
			&LineConfig::default().with_stop_bits(StopBits::OnePointFive)
		)
		.is_err());
		assert_eq!(base.c_lflag, before);
	}

	#[test]
	pub fn applied_line_settings_are_compared() {
		let requested = translate_line_config(
			&zeroed_termios(),
			&LineConfig::new(19200, 7, Parity::Even, StopBits::Two),
		)
		.expect("19200 7E2 should translate");
		assert!(line_settings_match(&requested, &requested));

		// What a pseudo terminal does: force CS8, and drop parity.
		let mut coerced = requested;
		coerced.c_cflag = (coerced.c_cflag & !(libc::CSIZE | libc::PARENB)) | libc::CS8;
		assert!(
			!line_settings_match(&requested, &coerced),
			"A driver that silently swapped to 8N2 must be noticed",
		);

		let mut slower = requested;
		unsafe {
			libc::cfsetospeed(&mut slower, libc::B9600);
		}
		assert!(!line_settings_match(&requested, &slower));

		// Flags outside the line settings don't matter.
		let mut raw_differs = requested;
		raw_differs.c_lflag |= libc::ECHO;
		raw_differs.c_cc[libc::VTIME] = 7;
		assert!(line_settings_match(&requested, &raw_differs));
	}

	#[test]
	pub fn timeout_regimes() {
		assert_eq!(
			translate_timeout(ReadTimeout::Blocking),
			Ok(TermiosTimeout { vmin: 1, vtime: 0 })
		);
		assert_eq!(
			translate_timeout(ReadTimeout::Poll),
			Ok(TermiosTimeout { vmin: 0, vtime: 0 })
		);
		assert_eq!(
			translate_timeout(ReadTimeout::from_millis(1000)),
			Ok(TermiosTimeout { vmin: 0, vtime: 10 })
		);
	}

	#[test]
	pub fn timed_reads_round_up_to_tenths() {
		for (ms, tenths) in [(1, 1), (50, 1), (99, 1), (100, 1), (101, 2), (150, 2), (25_500, 255)] {
			assert_eq!(
				translate_timeout(ReadTimeout::from_millis(ms)),
				Ok(TermiosTimeout {
					vmin: 0,
					vtime: tenths
				}),
				"{ms}ms should round up to {tenths} tenths of a second",
			);
		}
		assert_eq!(
			translate_timeout(ReadTimeout::Timed(Duration::from_micros(10))),
			Ok(TermiosTimeout { vmin: 0, vtime: 1 }),
			"A sub-millisecond timeout must not degrade into a poll",
		);
	}

	#[test]
	pub fn timed_reads_past_vtime_are_rejected() {
		assert_eq!(
			translate_timeout(ReadTimeout::from_millis(25_501)),
			Err(ConfigError::TimeoutOutOfRange(25_501)),
		);
	}

	#[test]
	pub fn poll_timeouts_follow_vmin_and_vtime() {
		assert_eq!(TermiosTimeout { vmin: 1, vtime: 0 }.poll_timeout_ms(), -1);
		assert_eq!(TermiosTimeout { vmin: 0, vtime: 0 }.poll_timeout_ms(), 0);
		assert_eq!(TermiosTimeout { vmin: 0, vtime: 1 }.poll_timeout_ms(), 100);
		assert_eq!(TermiosTimeout { vmin: 0, vtime: 255 }.poll_timeout_ms(), 25_500);
	}

	#[test]
	pub fn non_terminals_are_refused() {
		let file = tempfile::tempfile().expect("Failed to create temporary file");
		let result = RawSerialPort::from_fd(file.into(), &LineConfig::default());
		match result {
			Err(SerialError::Io(cause)) => assert_eq!(cause.raw_os_error(), Some(libc::ENOTTY)),
			other => panic!("Opening a regular file as a serial port should fail with ENOTTY, got: {other:?}"),
		}
	}
}
