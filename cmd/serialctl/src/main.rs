#![allow(
	// Most imports are used WITHOUT the module name, so repeating it in the
	// item name is what keeps things readable out of context.
	clippy::module_name_repetitions,
)]

pub mod commands;
pub mod exit_codes;
pub mod knobs;
pub mod utils;

use crate::{
	commands::{
		apply_read_timeout, decode_send_data, handle_help, handle_list, handle_loopback,
		handle_send, handle_tail, open_serial_device, require_serial_port,
	},
	exit_codes::{
		ARGUMENT_PARSING_FAILURE, LOGGING_HANDLER_INSTALL_FAILURE, NO_ARGUMENT_SPECIFIED_FAILURE,
		SHOULD_NEVER_HAPPEN_FAILURE,
	},
	knobs::{
		cli::{CliArguments, Subcommands},
		env::{TRACE_SERIAL_IO, USE_JSON_OUTPUT},
	},
};
use clap::Parser;
use log::install_logging_handlers;
use miette::miette;
use serial_line::Diagnostics;
use std::path::PathBuf;
use tracing::error;

#[tokio::main]
async fn main() {
	let (argv, use_json) = bootstrap_cli();

	if argv.help || argv.commands.is_none() || matches!(argv.commands, Some(Subcommands::Help {})) {
		let should_error = argv.commands.is_none();
		handle_help(use_json, argv.commands);
		std::process::exit(if should_error {
			NO_ARGUMENT_SPECIFIED_FAILURE
		} else {
			0
		});
	}

	let line_config = argv.line_config();
	let read_timeout = argv.read_timeout();
	let diagnostics = Diagnostics {
		trace_io: argv.trace_io || *TRACE_SERIAL_IO,
	};

	let Some(sub_command) = argv.commands else {
		if use_json {
			error!(
				id = "serialctl::help::internal",
				cause = "Didn't call help even when subcommands was none?"
			);
		} else {
			error!(
				"\n{:?}",
				miette!("internal error: Failed to specify a single command, and didn't call `help` handler?"),
			);
		}
		std::process::exit(SHOULD_NEVER_HAPPEN_FAILURE);
	};

	match sub_command {
		// Help is handled above.
		Subcommands::Help {} => unreachable!(),
		Subcommands::List { check } => handle_list(use_json, check, &line_config),
		Subcommands::Loopback {
			port_a,
			port_b,
			sizes,
		} => {
			let device_a = open_serial_device(use_json, &port_a, &line_config, diagnostics);
			let device_b = open_serial_device(use_json, &port_b, &line_config, diagnostics);
			apply_read_timeout(use_json, &device_b, read_timeout);
			handle_loopback(use_json, &device_a, &device_b, read_timeout, &sizes);
		}
		Subcommands::Send {
			serial_port_flag,
			first_positional,
			second_positional,
			hex,
		} => {
			// With two positionals the first one is the serial port.
			let (port_positional, data) = match second_positional {
				Some(data) => (Some(PathBuf::from(first_positional)), data),
				None => (None, first_positional),
			};
			let port = require_serial_port(
				use_json,
				"send",
				serial_port_flag.as_ref(),
				port_positional.as_ref(),
			);
			let bytes = decode_send_data(use_json, &data, hex);
			let device = open_serial_device(use_json, &port, &line_config, diagnostics);
			handle_send(use_json, &device, &bytes);
		}
		Subcommands::Tail {
			serial_port_flag,
			serial_port_positional,
		} => {
			let port = require_serial_port(
				use_json,
				"tail",
				serial_port_flag.as_ref(),
				serial_port_positional.as_ref(),
			);
			let device = open_serial_device(use_json, &port, &line_config, diagnostics);
			apply_read_timeout(use_json, &device, read_timeout);
			handle_tail(use_json, device, read_timeout).await;
		}
	}
}

fn bootstrap_cli() -> (CliArguments, bool) {
	let args_opt = CliArguments::try_parse();

	let use_json_cli = args_opt.as_ref().map_or_else(
		|_error| {
			// Parsing failed, but the user may still want the failure in JSON.
			std::env::args().any(|arg| arg.as_str() == "-j" || arg.as_str() == "--json")
		},
		|args| args.json,
	);
	let use_json = *USE_JSON_OUTPUT || use_json_cli;

	if let Err(cause) = install_logging_handlers(use_json) {
		// Logging isn't setup, so this is the one place we print directly.
		if use_json {
			println!(
				r#"{{"id": "serialctl::logging::install_failure", "inner_display_error": "{}", "message": "Failed to install the logging handlers!"}}"#,
				format!("{cause:?}").replace('"', "\\\"")
			);
		} else {
			println!("Failed to install the logging handler to setup logging:\n{cause:?}");
		}
		std::process::exit(LOGGING_HANDLER_INSTALL_FAILURE);
	}

	match args_opt {
		Ok(args) => (args, use_json),
		Err(cause) => {
			if use_json {
				error!(
					id = "serialctl::cli::arg_parse_failure",
					error.kind = %cause.kind(),
					error.context = ?cause.context().map(|(kind, value)| format!("{kind}: {value}")).collect::<Vec<String>>(),
					error.rendered = %cause.render(),
					"Failed parsing CLI arguments"
				);
			} else {
				error!(
					"\n{:?}",
					miette!("Failed parsing CLI arguments!").wrap_err(cause),
				);
			}

			std::process::exit(ARGUMENT_PARSING_FAILURE);
		}
	}
}
