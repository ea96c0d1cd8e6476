use crate::{
	exit_codes::{SEND_INVALID_DATA, SEND_WRITE_FAILURE},
	utils::{add_context_to, parse_hex, to_hex},
};
use miette::{miette, Report};
use serial_line::SerialDevice;
use tracing::{error, info};

/// Decode the data a user asked us to send.
///
/// ## Panics
///
/// If the data is supposed to be hex, but isn't.
#[must_use]
pub fn decode_send_data(use_json: bool, data: &str, is_hex: bool) -> Vec<u8> {
	if !is_hex {
		return data.as_bytes().to_vec();
	}

	match parse_hex(data) {
		Ok(bytes) => bytes,
		Err(cause) => {
			if use_json {
				error!(
					id = "serialctl::send::invalid_hex",
					%cause,
					data,
					"data to send was not valid hex",
				);
			} else {
				error!(
					"\n{:?}",
					miette!(
						help = "Hex data is two digits per byte, e.g. `0d0a` or `0d 0a` for a carriage return and line feed.",
						"Could not decode the data to send as hex: {cause}",
					),
				);
			}

			std::process::exit(SEND_INVALID_DATA);
		}
	}
}

/// Write all of `data` to a serial port, and wait for it to be transmitted.
pub fn handle_send(use_json: bool, device: &SerialDevice, data: &[u8]) {
	if let Err(cause) = device.write_all(data).and_then(|()| device.flush()) {
		if use_json {
			error!(
				id = "serialctl::send::write_failure",
				?cause,
				port = %device.path().display(),
				"failed to write to serial port",
			);
		} else {
			error!(
				"\n{:?}",
				add_context_to(
					Report::new(cause),
					[miette!(
						help = format!("Serial port: {}", device.path().display()),
						"Failed to write all the data to the serial port, some of it may have been sent.",
					)]
					.into_iter(),
				),
			);
		}

		std::process::exit(SEND_WRITE_FAILURE);
	}

	if use_json {
		info!(
			id = "serialctl::send::sent",
			port = %device.path().display(),
			bytes = data.len(),
			hex = %to_hex(data),
			"sent data to serial port",
		);
	} else {
		info!(
			port = %device.path().display(),
			bytes = data.len(),
			"Sent data to serial port!",
		);
	}
}
