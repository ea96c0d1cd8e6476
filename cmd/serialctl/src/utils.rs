//! Utility functions that don't have one place that they should live.

use hex::FromHexError;
use miette::Report;
use std::fmt::Write;

/// Add context to a specific error, where you can have like a list of
/// suggestions.
///
/// NOTE: we cannot reassign a reports severity, so your last items severity
///       is where the real severity gets taken.
pub fn add_context_to(
	original_error: Report,
	suggestions: impl DoubleEndedIterator<Item = Report>,
) -> Report {
	let mut latest_error: Option<Report> = None;

	for suggestion in suggestions.rev() {
		if let Some(last_error) = latest_error {
			latest_error = Some(last_error.wrap_err(suggestion));
		} else {
			latest_error = Some(suggestion);
		}
	}

	if let Some(latest) = latest_error {
		latest.wrap_err(original_error)
	} else {
		original_error
	}
}

/// Render bytes as space separated lowercase hex, e.g. `de ad be ef`.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
	let mut rendered = String::with_capacity(bytes.len() * 3);
	for (idx, byte) in bytes.iter().enumerate() {
		if idx != 0 {
			rendered.push(' ');
		}
		// Writing to a string can't fail.
		_ = write!(rendered, "{byte:02x}");
	}
	rendered
}

/// Parse hex encoded bytes, ignoring any whitespace in between.
///
/// ## Errors
///
/// If there's an odd number of digits, or something that isn't a hex digit.
pub fn parse_hex(data: &str) -> Result<Vec<u8>, FromHexError> {
	let digits = data
		.chars()
		.filter(|character| !character.is_whitespace())
		.collect::<String>();
	hex::decode(digits)
}

#[cfg(test)]
mod unit_tests {
	use super::*;

	#[test]
	pub fn hex_rendering() {
		assert_eq!(to_hex(&[]), "");
		assert_eq!(to_hex(&[0x0a]), "0a");
		assert_eq!(to_hex(&[0xde, 0xad, 0xbe, 0xef]), "de ad be ef");
	}

	#[test]
	pub fn hex_parsing() {
		assert_eq!(parse_hex("deadBEEF"), Ok(vec![0xde, 0xad, 0xbe, 0xef]));
		assert_eq!(
			parse_hex("0d 0a\t41"),
			Ok(vec![0x0d, 0x0a, 0x41]),
			"Whitespace between bytes should be ignored",
		);
		assert_eq!(parse_hex(""), Ok(Vec::new()));
		assert_eq!(
			parse_hex("abc"),
			Err(FromHexError::OddLength),
			"Odd digit counts must fail",
		);
		assert!(
			matches!(parse_hex("0z"), Err(FromHexError::InvalidHexCharacter { c: 'z', .. })),
			"Non hex digits must fail",
		);
		assert_eq!(
			parse_hex("0d 0\n"),
			Err(FromHexError::OddLength),
			"Whitespace can't stand in for a digit",
		);
	}

	#[test]
	pub fn hex_parses_what_it_renders() {
		let bytes = (0..=255_u8).collect::<Vec<_>>();
		assert_eq!(parse_hex(&to_hex(&bytes)), Ok(bytes));
	}
}
