//! Defines the command line interface a.k.a. all the arguments & flags.

use clap::Parser;
use serial_line::{
	LineConfig, Parity, ReadTimeout, StopBits, DEFAULT_BAUD_RATE, DEFAULT_TIMED_READ_MS,
};
use std::path::PathBuf;

/// The payload sizes a loopback test sends when none are given.
pub const DEFAULT_LOOPBACK_SIZES: [usize; 3] = [1, 255, 10_000];

#[derive(Parser, Debug)]
#[clap(disable_help_flag = true, disable_help_subcommand = true)]
#[command(about, author, name = "serialctl", propagate_version = true, version)]
pub struct CliArguments {
	#[arg(
		global = true,
		short = 'b',
		long = "baud",
		default_value_t = DEFAULT_BAUD_RATE,
		help = "The baud rate to open serial ports with.",
		long_help = "The baud rate to open serial ports with. Only the standard rates your OS knows about are accepted (e.g. 9600, 19200, 57600, 115200)."
	)]
	pub baud_rate: u32,
	#[command(subcommand)]
	pub commands: Option<Subcommands>,
	#[arg(
		global = true,
		long = "data-bits",
		default_value_t = 8,
		help = "The amount of data bits per character, 7 or 8.",
		long_help = "The amount of data bits in each character sent over the line, this can be either 7, or 8."
	)]
	pub data_bits: u8,
	#[arg(
		global = true,
		short = 'h',
		long = "help",
		help = "Display the help page for your command rather than running it.",
		long_help = "Show the help output for either the top level cli, or a particular subcommand. This will always be prioritized."
	)]
	pub help: bool,
	#[arg(
		global = true,
		short = 'j',
		long = "json",
		help = "Ensures all logging comes out in JSON instead of text.",
		long_help = "Switch all logging and output to JSON for machine parsable output. NOTE: there is no necissarily guaranteed structure, though we will not break it unnecissarily."
	)]
	pub json: bool,
	#[arg(
		global = true,
		long = "parity",
		default_value_t = Parity::None,
		help = "The parity to use: none, odd, or even.",
		long_help = "The parity bit to add to each character: `none` (or `n`), `odd` (or `o`), `even` (or `e`)."
	)]
	pub parity: Parity,
	#[arg(
		global = true,
		long = "stop-bits",
		default_value_t = StopBits::One,
		help = "The amount of stop bits: 1, 1.5, or 2.",
		long_help = "The amount of stop bits following each character: `1`, `1.5`, or `2`. Note that `1.5` is only supported on windows."
	)]
	pub stop_bits: StopBits,
	#[arg(
		global = true,
		short = 't',
		long = "timeout-ms",
		allow_negative_numbers = true,
		default_value_t = DEFAULT_TIMED_READ_MS,
		help = "How long a single read waits for data in milliseconds.",
		long_help = "How long a single read is allowed to wait for data, in milliseconds. Negative values wait forever, 0 never waits. On unix this gets rounded up to the next tenth of a second."
	)]
	pub timeout_ms: i64,
	#[arg(
		global = true,
		long = "trace-io",
		help = "Log every byte read, or written (at the trace level).",
		long_help = "Log every byte read from, or written to a serial port. These are logged at the trace level, so you'll also want to set `SERIALCTL_LOGGING=info,serial_line=trace`."
	)]
	pub trace_io: bool,
}

impl CliArguments {
	/// The line configuration requested on the command line.
	#[must_use]
	pub const fn line_config(&self) -> LineConfig {
		LineConfig::new(self.baud_rate, self.data_bits, self.parity, self.stop_bits)
	}

	/// The read timeout requested on the command line.
	#[must_use]
	pub fn read_timeout(&self) -> ReadTimeout {
		ReadTimeout::from_millis(self.timeout_ms)
	}
}

#[derive(Parser, Debug)]
#[clap(disable_help_flag = true, disable_help_subcommand = true)]
pub enum Subcommands {
	/// An alternative to `-h`, or `--help` to show the help for the top level CLI.
	#[command(name = "help")]
	Help {},
	/// List all the serial ports your OS knows about.
	#[command(name = "list", visible_alias = "ls")]
	List {
		#[arg(
			short = 'c',
			long = "check",
			help = "Try opening each port with the given line settings.",
			long_help = "Try opening (and closing) each port with the given line settings, and report which ones can be used. Opening a port toggles its modem lines, which resets some boards."
		)]
		check: bool,
	},
	/// Send two serial ports data back, and forth to make sure they're connected to each other.
	#[command(name = "loopback")]
	Loopback {
		#[arg(
			index = 1,
			help = "The first serial port.",
			long_help = "The first serial port of the pair, data gets written here first and read back on the second."
		)]
		port_a: PathBuf,
		#[arg(
			index = 2,
			help = "The second serial port.",
			long_help = "The second serial port of the pair, this should be connected to the first one with a null-modem cable (or something like com0com)."
		)]
		port_b: PathBuf,
		#[arg(
			long = "sizes",
			value_delimiter = ',',
			default_values_t = DEFAULT_LOOPBACK_SIZES,
			help = "The payload sizes to send, separated by commas.",
			long_help = "The size of each payload to send in bytes, separated by commas. Each size is sent in both directions."
		)]
		sizes: Vec<usize>,
	},
	/// Write some data to a serial port.
	#[command(name = "send")]
	Send {
		#[arg(
			short = 's',
			long = "serial-port",
			help = "The serial port to write to.",
			long_help = "The serial port to write to, this conflicts with specifying the serial port as a positional argument."
		)]
		serial_port_flag: Option<PathBuf>,
		#[arg(
			index = 1,
			help = "The serial port to write to followed by the data, or just the data.",
			long_help = "If two positional arguments are passed this is the serial port, otherwise this is the data to send."
		)]
		first_positional: String,
		#[arg(
			index = 2,
			help = "The data to send when a serial port is passed positionally.",
			long_help = "The data to send, when the serial port is passed as the first positional argument."
		)]
		second_positional: Option<String>,
		#[arg(
			short = 'x',
			long = "hex",
			help = "Treat the data as hex encoded bytes.",
			long_help = "Treat the data as hex encoded bytes (whitespace is ignored), rather than sending the text as is."
		)]
		hex: bool,
	},
	/// Print everything that comes in on a serial port until it closes, or you hit Ctrl-C.
	#[command(name = "tail")]
	Tail {
		#[arg(
			short = 's',
			long = "serial-port",
			help = "The serial port to tail.",
			long_help = "The serial port to tail, this conflicts with specifying the serial port as a positional argument."
		)]
		serial_port_flag: Option<PathBuf>,
		#[arg(
			index = 1,
			help = "The serial port to tail.",
			long_help = "The serial port to tail, on windows this is something like `COM1`, on unix a full path like `/dev/ttyUSB0`."
		)]
		serial_port_positional: Option<PathBuf>,
	},
}

impl Subcommands {
	#[must_use]
	pub fn name_matches(&self, name: &str) -> bool {
		match self {
			Self::Help {} => name == "help",
			Self::List { .. } => name == "list" || name == "ls",
			Self::Loopback { .. } => name == "loopback",
			Self::Send { .. } => name == "send",
			Self::Tail { .. } => name == "tail",
		}
	}
}
