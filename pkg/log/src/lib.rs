#![doc = include_str!("../README.md")]

use miette::{miette, IntoDiagnostic, Result};
use once_cell::sync::Lazy;
use std::{env::var as env_var, sync::Mutex};
use tracing::debug;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
	fmt::layer as tracing_fmt_layer, prelude::*, registry as subscriber_registry, EnvFilter,
};

/// The environment variable to set a log filter with when `RUST_LOG` is not
/// set.
pub const LOGGING_ENV_NAME: &str = "SERIALCTL_LOGGING";
/// The filter used when nothing is configured.
pub const DEFAULT_FILTER: &str = "info";

/// Check if we have actually initialized logging before.
static HAS_INITIALIZED_LOGGING: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Determine if our logger will use ANSI escape codes.
///
/// Although i wish we had support for better detection than this, this is
/// unfortunately inhereted from tracing-subscriber which is significantly
/// better at like everything else.
///
/// So even though it kinda stinks here, it's worth the tradeoff. This line is
/// copied directly from tracing subscriber:
/// <https://github.com/tokio-rs/tracing/blob/07b490067c0e2af61f48a3d2afb85a20ab70ba95/tracing-subscriber/src/fmt/fmt_subscriber.rs#L697>
#[must_use]
pub fn will_ansi() -> bool {
	env_var("NO_COLOR").map_or(true, |v| v.is_empty())
}

/// Pick the filter directives to use.
///
/// `rust_log` always wins, then our own variable, then [`DEFAULT_FILTER`].
/// Empty values count as not set.
#[must_use]
pub fn filter_directives(rust_log: Option<String>, explicit_level: Option<String>) -> String {
	rust_log
		.filter(|value| !value.trim().is_empty())
		.or_else(|| explicit_level.filter(|value| !value.trim().is_empty()))
		.unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Install all the logging configuration needed for an application.
///
/// This should only ever be called as the very first part of `main`, and
/// nowhere else. If you try to call it elsewhere, you'll just get am error.
///
/// See the tracing docs for logging for more information:
/// <https://docs.rs/tracing/latest/tracing/#shorthand-macros>
///
/// # Errors
///
/// - If logging has already been installed.
/// - If the configured filter can't be parsed.
pub fn install_logging_handlers(use_json: bool) -> Result<()> {
	{
		let mut locked_init = HAS_INITIALIZED_LOGGING
			.lock()
			.map_err(|_| miette!("Logging initialization state was poisoned!"))?;
		if *locked_init {
			return Err(miette!("Logging has already been initialized!"));
		}
		*locked_init = true;
	}

	let directives = filter_directives(env_var("RUST_LOG").ok(), env_var(LOGGING_ENV_NAME).ok());
	let filter_layer = EnvFilter::try_new(&directives).into_diagnostic()?;
	let registry = subscriber_registry().with(filter_layer);

	if use_json {
		registry
			.with(tracing_fmt_layer().with_target(true).json())
			.with(ErrorLayer::default())
			.init();
	} else {
		registry
			.with(tracing_fmt_layer().with_target(true).with_ansi(will_ansi()))
			.with(ErrorLayer::default())
			.init();
	}

	debug!(%directives, use_json, "installed logging handlers");
	Ok(())
}
