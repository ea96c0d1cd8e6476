//! Handles the help command, or when the help flag is specified on a
//! particular subcommand.
//!
//! We handle `help` ourselves rather than leaving it all to [`clap`] so the
//! output can come out as JSON too.

use crate::knobs::cli::{CliArguments, Subcommands};
use clap::{Arg, Command, CommandFactory};
use tracing::{field::valuable, info, warn};
use valuable::Valuable;

/// Print help for the top level cli, or one particular subcommand.
///
/// If a subcommand somehow can't be found by name we fall back to the top
/// level help rather than failing.
pub fn handle_help(output_json: bool, opt_sub_command: Option<Subcommands>) {
	let mut top_level_command = CliArguments::command();
	let mut subcommands_as_command = Subcommands::command();

	let found = match opt_sub_command.as_ref() {
		Some(sub_command) => subcommands_as_command
			.get_subcommands_mut()
			.find(|potential_command| sub_command.name_matches(potential_command.get_name())),
		None => None,
	};
	if opt_sub_command.is_some() && found.is_none() {
		warn!(
			id = "serialctl::help::unmatched_subcommand",
			"internal error: recognized subcommand could not be matched on name, showing top level help",
		);
	}
	let (command, is_top_level) = match found {
		Some(sub_command) => (sub_command, false),
		None => (&mut top_level_command, true),
	};

	if !output_json {
		info!("{}", command.render_long_help());
		return;
	}

	let args = command
		.get_arguments()
		.map(OwnedOptionHelpOutput::from)
		.collect::<Vec<_>>();
	let aliases = command
		.get_all_aliases()
		.map(ToOwned::to_owned)
		.collect::<Vec<_>>();
	let command_name = command.get_name().to_owned();
	let help = format!("{}", command.render_long_help());
	let options = command
		.get_opts()
		.map(OwnedOptionHelpOutput::from)
		.collect::<Vec<_>>();
	let positionals = command
		.get_positionals()
		.map(OwnedOptionHelpOutput::from)
		.collect::<Vec<_>>();
	let subcommands = command
		.get_subcommands_mut()
		.map(SubcommandHelpOutput::from)
		.collect::<Vec<_>>();

	info!(
		id = if is_top_level {
			"serialctl::help::top_level".to_owned()
		} else {
			format!("serialctl::help::{command_name}")
		},
		help.args = valuable(&args),
		help.aliases = valuable(&aliases),
		help.display_help_text = help,
		help.options = valuable(&options),
		help.positionals = valuable(&positionals),
		help.name = command_name,
		help.sub_commands = valuable(&subcommands),
	);
}

#[derive(Debug, Valuable)]
struct SubcommandHelpOutput {
	pub aliases: Vec<String>,
	pub args: Vec<OwnedOptionHelpOutput>,
	pub help_output: String,
	pub name: String,
	pub positionals: Vec<OwnedOptionHelpOutput>,
}
impl From<&mut Command> for SubcommandHelpOutput {
	fn from(value: &mut Command) -> Self {
		let help_output = format!("{}", value.render_help());
		Self {
			aliases: value.get_all_aliases().map(ToOwned::to_owned).collect(),
			args: value
				.get_arguments()
				.map(OwnedOptionHelpOutput::from)
				.collect(),
			help_output,
			name: value.get_name().to_owned(),
			positionals: value
				.get_positionals()
				.map(OwnedOptionHelpOutput::from)
				.collect(),
		}
	}
}

#[derive(Debug, Valuable)]
struct OwnedOptionHelpOutput {
	pub default_values: Vec<String>,
	pub is_global: bool,
	pub long_flag_name: Option<String>,
	pub name: String,
	pub short_flag_name: Option<char>,
	pub option_help: Option<String>,
}
impl From<&Arg> for OwnedOptionHelpOutput {
	fn from(option: &Arg) -> Self {
		Self {
			default_values: option
				.get_default_values()
				.iter()
				.map(|dv| format!("{}", dv.to_string_lossy()))
				.collect(),
			is_global: option.is_global_set(),
			long_flag_name: option.get_long().map(ToOwned::to_owned),
			name: option.get_id().as_str().to_owned(),
			short_flag_name: option.get_short(),
			option_help: option.get_long_help().map(|sstr| format!("{sstr}")),
		}
	}
}

#[cfg(test)]
mod unit_tests {
	use super::*;

	#[test]
	pub fn every_subcommand_can_be_found_by_name() {
		let mut subcommands = Subcommands::command();
		let names = subcommands
			.get_subcommands_mut()
			.map(|command| command.get_name().to_owned())
			.collect::<Vec<_>>();
		assert_eq!(names.len(), 5);

		for (sub_command, name) in [
			(Subcommands::Help {}, "help"),
			(Subcommands::List { check: false }, "list"),
			(
				Subcommands::Tail {
					serial_port_flag: None,
					serial_port_positional: None,
				},
				"tail",
			),
		] {
			assert!(names.iter().any(|known| known == name));
			assert!(sub_command.name_matches(name));
		}
	}

	#[test]
	pub fn options_carry_defaults() {
		let command = CliArguments::command();
		let baud = command
			.get_arguments()
			.find(|arg| arg.get_long() == Some("baud"))
			.map(OwnedOptionHelpOutput::from)
			.expect("`--baud` should exist");
		assert_eq!(baud.default_values, vec!["9600".to_owned()]);
		assert_eq!(baud.short_flag_name, Some('b'));
		assert!(baud.is_global);
	}
}
