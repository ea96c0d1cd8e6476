//! The line settings a serial device gets opened with.
//!
//! A [`LineConfig`] describes how bytes are framed on the wire: the baud
//! rate, how many data bits each character has, the parity bit, and how many
//! stop bits follow. It's purely a description, nothing here talks to the OS.
//! Each backend decides on its own which of these values it can actually
//! express, see [`crate::SerialDevice::open`].

use crate::errors::ConfigError;
use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
};

/// The baud rate used by [`LineConfig::default`].
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// The parity bit appended to each character.
///
/// Generating and checking parity always go together, a device is never
/// configured to generate a parity bit it won't check (or vice versa).
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum Parity {
	/// No parity bit at all.
	#[default]
	None,
	/// The parity bit makes the count of set bits odd.
	Odd,
	/// The parity bit makes the count of set bits even.
	Even,
}
impl Display for Parity {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		match *self {
			Self::None => write!(fmt, "none"),
			Self::Odd => write!(fmt, "odd"),
			Self::Even => write!(fmt, "even"),
		}
	}
}
impl FromStr for Parity {
	type Err = ConfigError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim().to_ascii_lowercase().as_str() {
			"none" | "n" => Ok(Self::None),
			"odd" | "o" => Ok(Self::Odd),
			"even" | "e" => Ok(Self::Even),
			_ => Err(ConfigError::UnknownParity(value.to_owned())),
		}
	}
}

/// How many stop bits follow each character.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum StopBits {
	/// One stop bit.
	#[default]
	One,
	/// One and a half stop bits.
	///
	/// Only Windows can express this, unix backends will refuse to open a
	/// device with it rather than picking a different value for you.
	OnePointFive,
	/// Two stop bits.
	Two,
}
impl Display for StopBits {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		match *self {
			Self::One => write!(fmt, "1"),
			Self::OnePointFive => write!(fmt, "1.5"),
			Self::Two => write!(fmt, "2"),
		}
	}
}
impl FromStr for StopBits {
	type Err = ConfigError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim() {
			"1" => Ok(Self::One),
			"1.5" => Ok(Self::OnePointFive),
			"2" => Ok(Self::Two),
			_ => Err(ConfigError::UnknownStopBits(value.to_owned())),
		}
	}
}

/// The full line configuration for a serial device.
///
/// Defaults to `9600 8N1`, which every backend supports.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct LineConfig {
	/// The baud rate, must be one of the rates the backend knows.
	pub baud_rate: u32,
	/// Data bits per character, either 7 or 8.
	pub data_bits: u8,
	/// See [`Parity`].
	pub parity: Parity,
	/// See [`StopBits`].
	pub stop_bits: StopBits,
}

impl LineConfig {
	/// Create a new line configuration.
	#[must_use]
	pub const fn new(baud_rate: u32, data_bits: u8, parity: Parity, stop_bits: StopBits) -> Self {
		Self {
			baud_rate,
			data_bits,
			parity,
			stop_bits,
		}
	}

	#[must_use]
	pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
		self.baud_rate = baud_rate;
		self
	}

	#[must_use]
	pub const fn with_data_bits(mut self, data_bits: u8) -> Self {
		self.data_bits = data_bits;
		self
	}

	#[must_use]
	pub const fn with_parity(mut self, parity: Parity) -> Self {
		self.parity = parity;
		self
	}

	#[must_use]
	pub const fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
		self.stop_bits = stop_bits;
		self
	}

	/// Check the parts of the configuration that don't depend on a backend.
	///
	/// ## Errors
	///
	/// If the data bits are anything other than 7, or 8.
	pub fn check_data_bits(&self) -> Result<(), ConfigError> {
		match self.data_bits {
			7 | 8 => Ok(()),
			other => Err(ConfigError::InvalidDataBits(other)),
		}
	}
}

impl Default for LineConfig {
	fn default() -> Self {
		Self::new(DEFAULT_BAUD_RATE, 8, Parity::None, StopBits::One)
	}
}

impl Display for LineConfig {
	/// Renders in the usual shorthand, e.g. `9600 8N1`, or `19200 7E1.5`.
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		let parity = match self.parity {
			Parity::None => 'N',
			Parity::Odd => 'O',
			Parity::Even => 'E',
		};
		write!(
			fmt,
			"{} {}{parity}{}",
			self.baud_rate, self.data_bits, self.stop_bits
		)
	}
}
