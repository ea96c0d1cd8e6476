//! List the serial ports the OS knows about, optionally checking whether
//! each one can actually be opened with the requested line settings.

use crate::exit_codes::{LIST_FAILED_ENUMERATION, LIST_NO_PORTS};
use miette::miette;
use serial_line::{LineConfig, SerialDevice, SerialError};
use std::path::Path;
use tracing::{error, field::valuable, info, warn};
use valuable::Valuable;

/// What we found out about a single port.
#[derive(Debug, Valuable)]
pub struct PortReport {
	pub port: String,
	/// `None` when we didn't try to open the port.
	pub usable: Option<bool>,
	pub problem: Option<String>,
}

impl PortReport {
	#[must_use]
	pub fn unchecked(port: &Path) -> Self {
		Self {
			port: port.display().to_string(),
			usable: None,
			problem: None,
		}
	}

	/// Turn the outcome of opening a port into a report.
	#[must_use]
	pub fn from_open_result<T>(port: &Path, result: &Result<T, SerialError>) -> Self {
		Self {
			port: port.display().to_string(),
			usable: Some(result.is_ok()),
			problem: result.as_ref().err().map(ToString::to_string),
		}
	}
}

/// List every serial port, when `check` is set each port gets opened (and
/// closed again) with `config`.
///
/// Opening a port toggles its modem lines, which resets some boards, so
/// checking only happens when asked for.
pub fn handle_list(use_json: bool, check: bool, config: &LineConfig) {
	let ports = serial_line::available_ports().unwrap_or_else(|cause| {
		if use_json {
			error!(
				id = "serialctl::list::enumeration_failed",
				?cause,
				"could not enumerate serial ports",
			);
		} else {
			error!(
				"\n{:?}",
				miette!(
					help = "On linux this reads `/sys/class/tty`, on windows the `SERIALCOMM` registry key.",
					"The OS would not tell us which serial ports exist.",
				)
				.wrap_err(cause),
			);
		}
		std::process::exit(LIST_FAILED_ENUMERATION);
	});

	if ports.is_empty() {
		if use_json {
			warn!(id = "serialctl::list::empty", "no serial ports present");
		} else {
			warn!("No serial ports are present, is your device plugged in, and its driver loaded?");
		}
		std::process::exit(LIST_NO_PORTS);
	}

	let reports = ports
		.iter()
		.map(|port| {
			if check {
				PortReport::from_open_result(port, &SerialDevice::open(port, config))
			} else {
				PortReport::unchecked(port)
			}
		})
		.collect::<Vec<_>>();

	if use_json {
		info!(
			id = "serialctl::list::ports",
			%config,
			checked = check,
			ports = valuable(&reports),
		);
		return;
	}

	for report in &reports {
		match (report.usable, &report.problem) {
			(None, _) => info!("{}", report.port),
			(Some(true), _) => info!("{} (opens as {config})", report.port),
			(Some(false), problem) => warn!(
				problem = problem.as_deref().unwrap_or("unknown"),
				"{} (can't be opened as {config})",
				report.port,
			),
		}
	}
}
