use crate::{
	exit_codes::{TAIL_COULD_NOT_SPAWN, TAIL_READ_FAILURE},
	utils::{add_context_to, to_hex},
};
use miette::{miette, Report};
use serial_line::{ReadTimeout, SerialDevice, SerialError, TimedRead, TimedReader};
use std::{
	sync::Arc,
	thread,
	time::{Duration, Instant},
};
use tokio::{signal::ctrl_c as ctrl_c_signal, task::spawn_blocking};
use tracing::{debug, error, info, warn};

/// How much we try to read at once while tailing.
const TAIL_CHUNK_SIZE: usize = 4096;
/// Empty reads in a row, each returning well before its timeout, before we
/// consider the other end gone.
const EARLY_EMPTY_READS_FOR_HANGUP: u32 = 3;
/// How long to idle after an empty poll.
const POLL_IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Notices a line that hung up.
///
/// After a hangup (e.g. a pseudo terminal's master going away) every read
/// returns nothing immediately, no matter the read policy.
#[derive(Debug)]
struct HangupDetector {
	timeout: ReadTimeout,
	early_empty_reads: u32,
}

impl HangupDetector {
	const fn new(timeout: ReadTimeout) -> Self {
		Self {
			timeout,
			early_empty_reads: 0,
		}
	}

	/// Record a read of `read` bytes that took `elapsed`, returns true once
	/// the line looks hung up.
	fn observe(&mut self, read: usize, elapsed: Duration) -> bool {
		let returned_early = read == 0
			&& match self.timeout {
				ReadTimeout::Blocking => true,
				// Polls are supposed to come back right away.
				ReadTimeout::Poll => false,
				ReadTimeout::Timed(timeout) => elapsed < timeout / 2,
			};

		if returned_early {
			self.early_empty_reads += 1;
		} else {
			self.early_empty_reads = 0;
		}
		self.early_empty_reads >= EARLY_EMPTY_READS_FOR_HANGUP
	}
}

/// Tail a serial port until it goes away, or a user manually hits Ctrl-C.
///
/// Reads happen on a blocking thread. Hitting Ctrl-C closes the device which
/// wakes that thread up even in the middle of a blocking read.
pub async fn handle_tail(use_json: bool, device: SerialDevice, timeout: ReadTimeout) {
	let device = Arc::new(device);
	let reader_device = Arc::clone(&device);
	let mut reader_task =
		spawn_blocking(move || tail_until_closed(use_json, &reader_device, timeout));

	let joined = tokio::select! {
		joined = &mut reader_task => joined,
		_ = ctrl_c_signal() => {
			if use_json {
				debug!(
					id = "serialctl::tail::graceful_shutdown",
					shutdown_reason = "ctrl-c",
					"shutting down gracefully"
				);
			} else {
				debug!(
					shutdown_reason = "ctrl-c",
					"shutting down serial tail gracefully..."
				);
			}
			device.close();
			reader_task.await
		}
	};

	match joined {
		Ok(Ok(total_bytes)) => {
			if use_json {
				debug!(
					id = "serialctl::tail::finished",
					port = %device.path().display(),
					total_bytes,
					"serial port closed",
				);
			} else {
				debug!(
					port = %device.path().display(),
					total_bytes,
					"Serial port closed, done tailing.",
				);
			}
		}
		Ok(Err(cause)) => {
			if use_json {
				error!(
					id = "serialctl::tail::read_failure",
					?cause,
					port = %device.path().display(),
					"could not read from this serial port."
				);
			} else {
				error!(
					"\n{:?}",
					add_context_to(
						Report::new(cause),
						[miette!(
							help = format!("Serial port: {}", device.path().display()),
							"The serial port gave us an error trying to read from it.",
						)]
						.into_iter(),
					),
				);
			}

			std::process::exit(TAIL_READ_FAILURE);
		}
		Err(cause) => {
			if use_json {
				error!(
					id = "serialctl::tail::failed_to_join_task",
					?cause,
					"internal error: could not spawn/join task."
				);
			} else {
				error!(
					"\n{:?}",
					add_context_to(
						miette!("{cause:?}"),
						[miette!(
							"internal error: could not spawn/join tasks on a thread pool"
						)]
						.into_iter()
					),
				);
			}

			std::process::exit(TAIL_COULD_NOT_SPAWN);
		}
	}
}

/// Log everything that comes in on `device` until it closes.
///
/// Returns the total amount of bytes received.
fn tail_until_closed(
	use_json: bool,
	device: &SerialDevice,
	timeout: ReadTimeout,
) -> Result<usize, SerialError> {
	let mut reader = TimedReader::new(device, timeout);
	let mut hangups = HangupDetector::new(timeout);
	let mut buff = vec![0_u8; TAIL_CHUNK_SIZE];
	let mut total_bytes = 0_usize;

	loop {
		let started = Instant::now();
		let read = match reader.timed_read(&mut buff) {
			Ok(read) => read,
			Err(SerialError::Eof) => return Ok(total_bytes),
			Err(cause) => return Err(cause),
		};
		if hangups.observe(read, started.elapsed()) {
			if use_json {
				warn!(
					id = "serialctl::tail::hung_up",
					port = %device.path().display(),
					total_bytes,
					"serial port hung up",
				);
			} else {
				warn!(
					port = %device.path().display(),
					"The serial port hung up (reads keep coming back empty right away), done tailing.",
				);
			}
			return Ok(total_bytes);
		}
		if read == 0 {
			// Nothing arrived in time, keep waiting.
			if timeout == ReadTimeout::Poll {
				thread::sleep(POLL_IDLE_BACKOFF);
			}
			continue;
		}
		total_bytes += read;

		let chunk = &buff[..read];
		let text = String::from_utf8_lossy(chunk);
		if use_json {
			info!(
				id = "serialctl::tail::chunk",
				port = %device.path().display(),
				bytes = read,
				%text,
				hex = %to_hex(chunk),
				"received data from serial port",
			);
		} else {
			info!(
				port = %device.path().display(),
				bytes = read,
				hex = %to_hex(chunk),
				"{}",
				text.trim_end_matches(&['\r', '\n'][..]),
			);
		}
	}
}
