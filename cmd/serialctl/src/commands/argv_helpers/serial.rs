use crate::{
	exit_codes::{
		CONFLICTING_SERIAL_PORT_ARGS, INVALID_LINE_SETTINGS, NEEDS_SERIAL_PORT,
		SERIAL_PORT_CONNECTION_FAILURE,
	},
	knobs::env::SERIALCTL_SERIAL_PORT,
	utils::add_context_to,
};
use miette::{miette, Report};
use serial_line::{Diagnostics, LineConfig, ReadTimeout, SerialDevice, SerialError};
use std::path::{Path, PathBuf};
use tracing::{error, field::valuable};

/// Coalesce all serial port arguments into a single serial port path.
///
/// The flag, and positional argument conflict with each other, the
/// environment variable is only used when neither is given.
///
/// ## Panics
///
/// If both the flag, and the positional argument were specified.
#[must_use]
pub fn coalesce_serial_ports(
	use_json: bool,
	serial_port_flag: Option<&PathBuf>,
	serial_port_positional: Option<&PathBuf>,
) -> Option<PathBuf> {
	if serial_port_flag.is_some() && serial_port_positional.is_some() {
		if use_json {
			error!(
				id = "serialctl::argv::conflicting_serial_port_args",
				flags.serial_port = ?serial_port_flag,
				args.serial_port = ?serial_port_positional,
				suggestions = valuable(&[
					"You only need to specify a serial port in one way, either through an argument, or a flag.",
				]),
			);
		} else {
			error!(
				"\n{:?}",
				add_context_to(
					miette!("Positional argument conflicts with flag arguments!"),
					[miette!(
						help = format!(
							"Serial Port Flag: `{serial_port_flag:?}` / Positional Argument: `{serial_port_positional:?}`",
						),
						"You only need to specify a serial port in one way, either through an argument, or a flag.",
					)]
					.into_iter(),
				),
			);
		}

		std::process::exit(CONFLICTING_SERIAL_PORT_ARGS);
	}

	serial_port_flag
		.or(serial_port_positional)
		.or(SERIALCTL_SERIAL_PORT.as_ref())
		.cloned()
}

/// Same as [`coalesce_serial_ports`], but exits if no serial port was given
/// at all.
///
/// ## Panics
///
/// If no serial port could be found, or the arguments conflict.
#[must_use]
pub fn require_serial_port(
	use_json: bool,
	command_name: &str,
	serial_port_flag: Option<&PathBuf>,
	serial_port_positional: Option<&PathBuf>,
) -> PathBuf {
	if let Some(path) = coalesce_serial_ports(use_json, serial_port_flag, serial_port_positional) {
		return path;
	}

	if use_json {
		error!(
			id = "serialctl::argv::no_serial_port",
			command = command_name,
			help = valuable(&[
				"You can specify a serial port as an argument, or with the flag `--serial-port` (aka `-s`).",
				"You can set the environment variable `SERIALCTL_SERIAL_PORT` if you don't want to specify arguments.",
				"You can use `serialctl list` to get a list of serial ports you might be able to use.",
			]),
			"Please specify a serial port.",
		);
	} else {
		error!(
			"\n{:?}",
			add_context_to(
				miette!("No serial port specified for `{command_name}`, it needs a serial port."),
				[
					miette!("You can specify a serial port with the argument without a flag, or through the flag `--serial-port` (aka `-s`)"),
					miette!("You can also set an environment variable: `SERIALCTL_SERIAL_PORT` if you don't want to specify arguments."),
					miette!("On windows this should be a device name like `COM1`, `COM2`, etc., on unix this should be a full path to a serial device like: `/dev/ttyUSB0`"),
					miette!("You can get a full list of serial ports with `serialctl list`."),
				]
				.into_iter(),
			),
		);
	}

	std::process::exit(NEEDS_SERIAL_PORT);
}

/// Open a serial device, exiting with a useful message if we can't.
///
/// ## Panics
///
/// If the line configuration is invalid, or the OS refuses to open the
/// device.
#[must_use]
pub fn open_serial_device(
	use_json: bool,
	path: &Path,
	config: &LineConfig,
	diagnostics: Diagnostics,
) -> SerialDevice {
	match SerialDevice::open_with(path, config, diagnostics) {
		Ok(device) => device,
		Err(cause) => exit_on_serial_setup_error(use_json, path, config, cause),
	}
}

/// Apply a read timeout to a freshly opened device.
///
/// ## Panics
///
/// If the timeout can't be applied.
pub fn apply_read_timeout(use_json: bool, device: &SerialDevice, timeout: ReadTimeout) {
	if let Err(cause) = device.set_read_timeout(timeout) {
		exit_on_serial_setup_error(use_json, device.path(), device.line_config(), cause);
	}
}

fn exit_on_serial_setup_error(
	use_json: bool,
	path: &Path,
	config: &LineConfig,
	cause: SerialError,
) -> ! {
	let exit_code = if matches!(cause, SerialError::Config(_)) {
		INVALID_LINE_SETTINGS
	} else {
		SERIAL_PORT_CONNECTION_FAILURE
	};

	if use_json {
		error!(
			id = "serialctl::argv::serial_connection_failure",
			?cause,
			%config,
			help = "Please file an issue if it's not clear why your serial device can't be used.",
			port = %path.display(),
			"failed to set up the serial device specified"
		);
	} else {
		error!(
			"\n{:?}",
			add_context_to(
				Report::new(cause),
				[
					miette!("Failed to set up the specified serial device."),
					miette!(
						help = format!(
							"Specified serial device is: {} with line settings: {config}",
							path.display()
						),
						"Please file an issue if it's not clear why your OS is giving us an error.",
					),
				]
				.into_iter(),
			),
		);
	}

	std::process::exit(exit_code);
}
