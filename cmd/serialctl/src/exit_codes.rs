//! The process exit codes `serialctl` can exit with.
//!
//! Every failure gets its own code so scripts can tell them apart without
//! parsing our output. `0` is always success.

/// Something happened that should be impossible, please file an issue.
pub const SHOULD_NEVER_HAPPEN_FAILURE: i32 = 1;
/// We could not install the logging handlers.
pub const LOGGING_HANDLER_INSTALL_FAILURE: i32 = 2;
/// The command line arguments could not be parsed.
pub const ARGUMENT_PARSING_FAILURE: i32 = 3;
/// No subcommand was given, help got printed instead.
pub const NO_ARGUMENT_SPECIFIED_FAILURE: i32 = 4;

/// A serial port was given both as a flag, and as a positional argument.
pub const CONFLICTING_SERIAL_PORT_ARGS: i32 = 10;
/// The command needs a serial port, but none was given.
pub const NEEDS_SERIAL_PORT: i32 = 11;
/// The line settings, or read timeout given can't be used on this OS.
pub const INVALID_LINE_SETTINGS: i32 = 12;
/// The OS refused to open, or configure the serial port.
pub const SERIAL_PORT_CONNECTION_FAILURE: i32 = 13;

/// The OS failed to list serial ports.
pub const LIST_FAILED_ENUMERATION: i32 = 20;
/// The OS listed zero serial ports.
pub const LIST_NO_PORTS: i32 = 21;

/// Reading from the serial port failed with something other than it closing.
pub const TAIL_READ_FAILURE: i32 = 30;
/// We could not spawn, or join the reader.
pub const TAIL_COULD_NOT_SPAWN: i32 = 31;

/// The data to send could not be decoded.
pub const SEND_INVALID_DATA: i32 = 40;
/// Writing to the serial port failed.
pub const SEND_WRITE_FAILURE: i32 = 41;

/// A payload did not come back as it was sent.
pub const LOOPBACK_MISMATCH: i32 = 50;
/// Reading, or writing failed during a loopback test.
pub const LOOPBACK_IO_FAILURE: i32 = 51;
