//! Thin wrapper around the Win32 comm APIs for talking to a serial port.
//!
//! All I/O is overlapped, a call that has to wait does so on its own event in
//! `GetOverlappedResult`. [`RawSerialPort::shutdown`] cancels every
//! outstanding transfer on the handle with `CancelIoEx`, and the aborted call
//! then reports `ERROR_INVALID_HANDLE` like any call made after shutdown.

use crate::{
	config::{LineConfig, Parity, StopBits},
	eof::normalize,
	errors::{ConfigError, SerialError},
	sys::NativePort,
	timeout::ReadTimeout,
};
use bytes::{Bytes, BytesMut};
use std::{
	ffi::CStr,
	fs::{File, OpenOptions},
	io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult},
	os::windows::{fs::OpenOptionsExt, io::AsRawHandle},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex, PoisonError,
	},
};
use tracing::debug;
use windows::{
	core::{PCSTR, PSTR},
	Win32::{
		Devices::Communication::{
			GetCommState, SetCommState, SetCommTimeouts, COMMTIMEOUTS, DCB, EVENPARITY, NOPARITY,
			ODDPARITY, ONE5STOPBITS, ONESTOPBIT, TWOSTOPBITS,
		},
		Foundation::{
			CloseHandle, ERROR_INVALID_HANDLE, ERROR_IO_PENDING, ERROR_NO_MORE_ITEMS,
			ERROR_OPERATION_ABORTED, HANDLE,
		},
		Storage::FileSystem::{FlushFileBuffers, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED},
		System::{
			Registry::{
				RegCloseKey, RegEnumValueA, RegOpenKeyExA, RegQueryInfoKeyA, HKEY,
				HKEY_LOCAL_MACHINE, KEY_READ, REG_SAM_FLAGS, REG_SZ,
			},
			Threading::CreateEventA,
			IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED},
		},
	},
};

/// `ERROR_INVALID_HANDLE`, the handle does not refer to an open device
/// anymore.
#[allow(
	// Win32 error codes all fit in an i32.
	clippy::cast_possible_wrap,
)]
pub const DEVICE_INVALIDATED: i32 = ERROR_INVALID_HANDLE.0 as i32;

/// The rates `SetCommState` accepts on every serial driver we care about.
const BAUD_RATES: &[u32] = &[
	110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200, 128_000,
	230_400, 256_000, 460_800, 921_600,
];

/// The longest timed read a `COMMTIMEOUTS` can express. `MAXDWORD` itself is
/// reserved as a marker value.
const MAX_TIMED_READ_MS: u128 = (u32::MAX - 1) as u128;

// Bit layout of `DCB::_bitfield`.
const F_BINARY: u32 = 1 << 0;
const F_PARITY: u32 = 1 << 1;
const F_OUTX_CTS_FLOW: u32 = 1 << 2;
const F_OUTX_DSR_FLOW: u32 = 1 << 3;
const F_DTR_CONTROL_MASK: u32 = 0b11 << 4;
const F_DTR_CONTROL_ENABLE: u32 = 0b01 << 4;
const F_DSR_SENSITIVITY: u32 = 1 << 6;
const F_OUTX: u32 = 1 << 8;
const F_INX: u32 = 1 << 9;
const F_ERROR_CHAR: u32 = 1 << 10;
const F_NULL: u32 = 1 << 11;
const F_RTS_CONTROL_MASK: u32 = 0b11 << 12;
const F_RTS_CONTROL_ENABLE: u32 = 0b01 << 12;
const F_ABORT_ON_ERROR: u32 = 1 << 14;

/// Translate a line configuration on top of the `DCB` a device currently has.
///
/// Besides the line settings this disables all flow control, all character
/// substitution, and abort-on-error, while keeping DTR and RTS raised.
///
/// ## Errors
///
/// - If the baud rate is not one a serial driver is guaranteed to take.
/// - If the data bits are not 7, or 8.
pub fn translate_line_config(base: &DCB, config: &LineConfig) -> Result<DCB, ConfigError> {
	if !BAUD_RATES.contains(&config.baud_rate) {
		return Err(ConfigError::InvalidSpeed(config.baud_rate));
	}
	config.check_data_bits()?;

	let mut dcb = *base;
	dcb.BaudRate = config.baud_rate;
	dcb.ByteSize = config.data_bits;
	dcb.Parity = match config.parity {
		Parity::None => NOPARITY,
		Parity::Odd => ODDPARITY,
		Parity::Even => EVENPARITY,
	};
	dcb.StopBits = match config.stop_bits {
		StopBits::One => ONESTOPBIT,
		StopBits::OnePointFive => ONE5STOPBITS,
		StopBits::Two => TWOSTOPBITS,
	};

	let mut bits = dcb._bitfield;
	bits |= F_BINARY;
	if config.parity == Parity::None {
		bits &= !F_PARITY;
	} else {
		bits |= F_PARITY;
	}
	bits &= !(F_OUTX_CTS_FLOW
		| F_OUTX_DSR_FLOW
		| F_DSR_SENSITIVITY
		| F_OUTX
		| F_INX
		| F_ERROR_CHAR
		| F_NULL
		| F_ABORT_ON_ERROR);
	bits = (bits & !F_DTR_CONTROL_MASK) | F_DTR_CONTROL_ENABLE;
	bits = (bits & !F_RTS_CONTROL_MASK) | F_RTS_CONTROL_ENABLE;
	dcb._bitfield = bits;

	Ok(dcb)
}

/// Translate a read policy into the read half of a `COMMTIMEOUTS`.
///
/// Writes never time out. Timed reads are passed through in milliseconds,
/// only a sub-millisecond request gets raised to 1ms.
///
/// ## Errors
///
/// If a timed read is longer than `MAXDWORD - 1` milliseconds.
#[allow(
	// Checked against the max right before.
	clippy::cast_possible_truncation,
)]
pub fn translate_timeout(timeout: ReadTimeout) -> Result<COMMTIMEOUTS, ConfigError> {
	let (interval, multiplier, constant) = match timeout {
		// Wait for the first byte forever, then return what has arrived.
		ReadTimeout::Blocking => (u32::MAX, u32::MAX, u32::MAX - 1),
		ReadTimeout::Poll => (u32::MAX, 0, 0),
		ReadTimeout::Timed(duration) => {
			let millis = duration.as_millis().max(1);
			if millis > MAX_TIMED_READ_MS {
				return Err(ConfigError::TimeoutOutOfRange(
					i64::try_from(millis).unwrap_or(i64::MAX),
				));
			}
			(u32::MAX, u32::MAX, millis as u32)
		}
	};

	Ok(COMMTIMEOUTS {
		ReadIntervalTimeout: interval,
		ReadTotalTimeoutMultiplier: multiplier,
		ReadTotalTimeoutConstant: constant,
		WriteTotalTimeoutMultiplier: 0,
		WriteTotalTimeoutConstant: 0,
	})
}

#[derive(Debug)]
pub struct RawSerialPort {
	fd: File,
	/// Serializes timeout commits.
	commit_lock: Mutex<()>,
	is_shutdown: AtomicBool,
}

impl RawSerialPort {
	fn handle(&self) -> HANDLE {
		HANDLE(self.fd.as_raw_handle() as isize)
	}

	fn ensure_live(&self) -> IoResult<()> {
		if self.is_shutdown.load(Ordering::SeqCst) {
			Err(IoError::from_raw_os_error(DEVICE_INVALIDATED))
		} else {
			Ok(())
		}
	}

	/// Report anything that failed after shutdown as an invalid handle.
	#[allow(
		// Win32 error codes all fit in an i32.
		clippy::cast_possible_wrap,
	)]
	fn invalidated_if_shutdown(&self, cause: IoError) -> IoError {
		if self.is_shutdown.load(Ordering::SeqCst)
			&& (cause.raw_os_error() == Some(ERROR_OPERATION_ABORTED.0 as i32)
				|| cause.raw_os_error() == Some(DEVICE_INVALIDATED))
		{
			IoError::from_raw_os_error(DEVICE_INVALIDATED)
		} else {
			cause
		}
	}

	/// Wait for an overlapped transfer that returned `ERROR_IO_PENDING`.
	///
	/// If the port was shutdown between starting the transfer, and getting
	/// here, the transfer is cancelled first so we never wait on it forever.
	fn wait_async_transfer(&self, overlapped: &mut OVERLAPPED) -> IoResult<isize> {
		if self.is_shutdown.load(Ordering::SeqCst) {
			unsafe {
				_ = CancelIoEx(self.handle(), Some(std::ptr::from_ref(overlapped)));
			}
		}

		let mut transferred = 0_u32;
		unsafe {
			GetOverlappedResult(self.handle(), overlapped, &mut transferred, true)
				.map_err(|_| IoError::last_os_error())
		}
		.map(|()| transferred as isize)
		.map_err(|cause| self.invalidated_if_shutdown(cause))
	}

	#[allow(
		// Wrap is guaranteed to not happen in this error code.
		clippy::cast_possible_wrap,
	)]
	fn finish_transfer(
		&self,
		started: IoResult<()>,
		transferred: u32,
		overlapped: &mut OVERLAPPED,
	) -> IoResult<isize> {
		match started {
			// Windows reports a timed out read as a successful transfer of 0
			// bytes, which is exactly what we report too.
			Ok(()) => Ok(transferred as isize),
			Err(cause) if cause.raw_os_error() == Some(ERROR_IO_PENDING.0 as i32) => {
				self.wait_async_transfer(overlapped)
			}
			Err(cause) => Err(self.invalidated_if_shutdown(cause)),
		}
	}
}

impl NativePort for RawSerialPort {
	type Timeout = COMMTIMEOUTS;

	/// The path you pass in for windows should be something like "COM1",
	/// `\\.\` gets added in front of it.
	#[allow(
		// Guaranteed to not truncate.
		clippy::cast_possible_truncation,
	)]
	fn open(path: &Path, config: &LineConfig) -> Result<Self, SerialError> {
		// Use the win32 device namespace, otherwise we're limited to COM1-9.
		//
		// <https://docs.microsoft.com/en-us/windows/win32/fileio/naming-a-file#win32-device-namespaces>
		let mut serial_port_path = PathBuf::from(r"\\.");
		serial_port_path.push(path);

		let fd = OpenOptions::new()
			.read(true)
			.write(true)
			.create(false)
			.custom_flags(FILE_FLAG_OVERLAPPED.0)
			.open(&serial_port_path)
			.map_err(normalize)?;
		let handle = HANDLE(fd.as_raw_handle() as isize);

		let mut base = DCB {
			DCBlength: std::mem::size_of::<DCB>() as u32,
			..Default::default()
		};
		unsafe {
			GetCommState(handle, &mut base)
				.map_err(|_| IoError::last_os_error())
				.map_err(normalize)?;
		}
		let dcb = translate_line_config(&base, config)?;
		let timeouts = translate_timeout(ReadTimeout::Blocking)?;

		unsafe {
			SetCommState(handle, &dcb)
				.map_err(|_| IoError::last_os_error())
				.map_err(normalize)?;
			SetCommTimeouts(handle, &timeouts)
				.map_err(|_| IoError::last_os_error())
				.map_err(normalize)?;
		}
		debug!(path = %serial_port_path.display(), %config, "committed line configuration");

		Ok(Self {
			fd,
			commit_lock: Mutex::new(()),
			is_shutdown: AtomicBool::new(false),
		})
	}

	fn translate_timeout(timeout: ReadTimeout) -> Result<Self::Timeout, ConfigError> {
		translate_timeout(timeout)
	}

	fn commit_timeout(&self, timeout: Self::Timeout) -> IoResult<()> {
		self.ensure_live()?;

		let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
		unsafe {
			SetCommTimeouts(self.handle(), &timeout).map_err(|_| IoError::last_os_error())
		}
		.map_err(|cause| self.invalidated_if_shutdown(cause))
	}

	fn read(&self, buff: &mut [u8]) -> IoResult<isize> {
		self.ensure_live()?;

		let event = Event::create(true, false)?;
		let mut read_bytes = 0_u32;
		let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
		overlapped.hEvent = event.handle;

		let started = unsafe {
			ReadFile(
				self.handle(),
				Some(buff),
				Some(&mut read_bytes),
				Some(&mut overlapped),
			)
		}
		.map_err(|_| IoError::last_os_error());
		self.finish_transfer(started, read_bytes, &mut overlapped)
	}

	fn write(&self, buff: &[u8]) -> IoResult<isize> {
		self.ensure_live()?;

		let event = Event::create(true, false)?;
		let mut written = 0_u32;
		let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
		overlapped.hEvent = event.handle;

		let started = unsafe {
			WriteFile(
				self.handle(),
				Some(buff),
				Some(&mut written),
				Some(&mut overlapped),
			)
		}
		.map_err(|_| IoError::last_os_error());
		self.finish_transfer(started, written, &mut overlapped)
	}

	fn flush(&self) -> IoResult<()> {
		self.ensure_live()?;
		unsafe { FlushFileBuffers(self.handle()).map_err(|_| IoError::last_os_error()) }
			.map_err(|cause| self.invalidated_if_shutdown(cause))
	}

	fn shutdown(&self) {
		if self.is_shutdown.swap(true, Ordering::SeqCst) {
			return;
		}
		// Fails with ERROR_NOT_FOUND when nothing is in flight, which is fine.
		unsafe {
			_ = CancelIoEx(self.handle(), None);
		}
	}
}

/// Enumerate all possible serial devices.
///
/// ## Errors
///
/// If we cannot query the registry for enumerating all possible serial devices.
pub fn enumerate() -> IoResult<Vec<PathBuf>> {
	let subkey =
		unsafe { CStr::from_bytes_with_nul_unchecked(b"Hardware\\DEVICEMAP\\SERIALCOMM\x00") };
	let device_map = match RegKey::open(HKEY_LOCAL_MACHINE, subkey, KEY_READ) {
		Ok(map) => map,
		// No serial drivers loaded at all.
		Err(cause) if cause.kind() == IoErrorKind::NotFound => return Ok(Vec::with_capacity(0)),
		Err(cause) => return Err(cause),
	};

	let (value_count, max_value_name_len, max_value_data_len) = device_map.get_value_info()?;

	let mut entries = Vec::with_capacity(value_count as usize);
	for idx in 0..value_count {
		let Ok(Some((_, port_name))) =
			device_map.get_string_value(idx, max_value_name_len, max_value_data_len)
		else {
			continue;
		};

		let trimmed = match port_name.iter().rposition(|&byte| byte != 0) {
			Some(last) => port_name.slice(..=last),
			None => continue,
		};
		if let Ok(name) = std::str::from_utf8(&trimmed) {
			entries.push(PathBuf::from(name));
		}
	}

	Ok(entries)
}

struct Event {
	handle: HANDLE,
}
impl Event {
	fn create(manual_reset: bool, initially_signalled: bool) -> IoResult<Self> {
		let handle = unsafe {
			CreateEventA(
				None, // security attributes
				manual_reset,
				initially_signalled,
				PCSTR(std::ptr::null()), // name
			)
			.map_err(|_| IoError::last_os_error())?
		};

		Ok(Self { handle })
	}
}
impl Drop for Event {
	fn drop(&mut self) {
		unsafe {
			_ = CloseHandle(self.handle);
		}
	}
}

#[derive(Debug)]
struct RegKey {
	key: HKEY,
}
impl RegKey {
	fn open(parent: HKEY, subpath: &CStr, rights: REG_SAM_FLAGS) -> IoResult<Self> {
		let mut key: HKEY = HKEY(std::ptr::null_mut::<std::ffi::c_void>() as isize);

		unsafe {
			RegOpenKeyExA(parent, PCSTR(subpath.as_ptr().cast()), 0, rights, &mut key)
				.ok()
				.map_err(|_| IoError::last_os_error())?;
		}

		Ok(Self { key })
	}

	fn get_value_info(&self) -> IoResult<(u32, u32, u32)> {
		let mut value_count = 0_u32;
		let mut max_value_name_len = 0_u32;
		let mut max_value_data_len = 0_u32;

		unsafe {
			RegQueryInfoKeyA(
				self.key,
				PSTR::null(),
				None,
				None,
				None,
				None,
				None,
				Some(&mut value_count),
				Some(&mut max_value_name_len),
				Some(&mut max_value_data_len),
				None,
				None,
			)
			.ok()
		}
		.map_err(|_| IoError::last_os_error())?;

		Ok((value_count, max_value_name_len, max_value_data_len))
	}

	/// Read the value at `index`, if it's a string.
	#[allow(
		// Truncation is guaranteed to not happen in this context.
		clippy::cast_possible_truncation,
	)]
	fn get_string_value(
		&self,
		index: u32,
		max_name_len: u32,
		max_data_len: u32,
	) -> IoResult<Option<(Bytes, Bytes)>> {
		let mut name = BytesMut::zeroed(max_name_len as usize + 1);
		let mut data = BytesMut::zeroed(max_data_len as usize);
		let mut name_len = name.len() as u32;
		let mut data_len = data.len() as u32;
		let mut kind = 0;

		let result = unsafe {
			RegEnumValueA(
				self.key,
				index,
				PSTR::from_raw(name.as_mut_ptr().cast()),
				&mut name_len,
				None,
				Some(&mut kind),
				Some(data.as_mut_ptr().cast()),
				Some(&mut data_len),
			)
		};
		if let Err(cause) = result.ok() {
			if cause.code() == ERROR_NO_MORE_ITEMS.into() {
				Ok(None)
			} else {
				Err(IoError::from_raw_os_error(cause.code().0))
			}
		} else if kind != REG_SZ.0 {
			Ok(None)
		} else {
			name.truncate(name_len as usize + 1);
			data.truncate(data_len as usize);
			Ok(Some((name.freeze(), data.freeze())))
		}
	}
}
impl Drop for RegKey {
	fn drop(&mut self) {
		unsafe {
			_ = RegCloseKey(self.key);
		}
	}
}

#[cfg(test)]
mod unit_tests {
	use super::*;
	use std::time::Duration;

	#[test]
	pub fn line_config_translates() {
		let dcb = translate_line_config(
			&DCB::default(),
			&LineConfig::new(19200, 7, Parity::Odd, StopBits::OnePointFive),
		)
		.expect("Windows can express 1.5 stop bits");
		assert_eq!(dcb.BaudRate, 19200);
		assert_eq!(dcb.ByteSize, 7);
		assert_eq!(dcb.Parity, ODDPARITY);
		assert_eq!(dcb.StopBits, ONE5STOPBITS);
		assert_eq!(dcb._bitfield & F_PARITY, F_PARITY);
		assert_eq!(dcb._bitfield & F_BINARY, F_BINARY);
	}

	#[test]
	pub fn flow_control_is_disabled() {
		let base = DCB {
			_bitfield: F_OUTX_CTS_FLOW | F_OUTX_DSR_FLOW | F_OUTX | F_INX | F_ABORT_ON_ERROR | F_PARITY,
			..Default::default()
		};
		let dcb = translate_line_config(&base, &LineConfig::default())
			.expect("default config should translate");
		assert_eq!(
			dcb._bitfield
				& (F_OUTX_CTS_FLOW | F_OUTX_DSR_FLOW | F_OUTX | F_INX | F_ABORT_ON_ERROR | F_PARITY),
			0,
		);
		assert_eq!(dcb._bitfield & F_DTR_CONTROL_MASK, F_DTR_CONTROL_ENABLE);
		assert_eq!(dcb._bitfield & F_RTS_CONTROL_MASK, F_RTS_CONTROL_ENABLE);
	}

	#[test]
	pub fn bad_line_configs_are_rejected() {
		assert_eq!(
			translate_line_config(&DCB::default(), &LineConfig::default().with_baud_rate(50)).err(),
			Some(ConfigError::InvalidSpeed(50)),
		);
		assert_eq!(
			translate_line_config(&DCB::default(), &LineConfig::default().with_data_bits(5)).err(),
			Some(ConfigError::InvalidDataBits(5)),
		);
	}

	#[test]
	pub fn timeouts_translate() {
		let blocking = translate_timeout(ReadTimeout::Blocking).expect("blocking translates");
		assert_eq!(blocking.ReadIntervalTimeout, u32::MAX);
		assert_eq!(blocking.ReadTotalTimeoutMultiplier, u32::MAX);
		assert_eq!(blocking.ReadTotalTimeoutConstant, u32::MAX - 1);

		let poll = translate_timeout(ReadTimeout::Poll).expect("poll translates");
		assert_eq!(poll.ReadIntervalTimeout, u32::MAX);
		assert_eq!(poll.ReadTotalTimeoutMultiplier, 0);
		assert_eq!(poll.ReadTotalTimeoutConstant, 0);

		let timed = translate_timeout(ReadTimeout::from_millis(50)).expect("50ms translates");
		assert_eq!(timed.ReadTotalTimeoutConstant, 50, "no rounding on windows");
		let tiny = translate_timeout(ReadTimeout::Timed(Duration::from_micros(1)))
			.expect("1us translates");
		assert_eq!(tiny.ReadTotalTimeoutConstant, 1);

		assert_eq!(
			translate_timeout(ReadTimeout::from_millis(i64::from(u32::MAX))).err(),
			Some(ConfigError::TimeoutOutOfRange(i64::from(u32::MAX))),
		);
	}
}
