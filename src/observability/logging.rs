//! Diagnostic logging on stderr.
//!
//! Stdout carries the operator console (status lines, device replies), so
//! log lines always go to stderr. `-v` raises only this crate's level; the
//! serial, runtime and exporter crates stay at `warn` until `-vvv`. Human
//! output is stamped with time since process start, the clock that phase
//! and jitter timings are read against. `FLASHER_LOG_LEVEL` replaces the
//! computed filter entirely.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::Uptime;

use crate::cli::args::ColorChoice;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_LEVEL_ENV: &str = "FLASHER_LOG_LEVEL";

const CRATE: &str = env!("CARGO_CRATE_NAME");

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Uptime-stamped text, colored when stderr allows it.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

/// Filter directive for a `-v` count.
///
/// 0 is `warn` everywhere, 1 and 2 lift `flasher` to `info` and `debug`,
/// 3 or more is `trace` everywhere.
#[must_use]
pub fn filter_directive(verbosity: u8) -> String {
    match verbosity {
        0 => "warn".to_owned(),
        1 => format!("warn,{CRATE}=info"),
        2 => format!("warn,{CRATE}=debug"),
        _ => "trace".to_owned(),
    }
}

/// Whether log lines get ANSI colors.
#[must_use]
pub const fn ansi_enabled(color: ColorChoice, stderr_is_tty: bool, no_color: bool) -> bool {
    match color {
        ColorChoice::Auto => stderr_is_tty && !no_color,
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Human => builder
            .with_ansi(ansi_enabled(
                color,
                std::io::stderr().is_terminal(),
                std::env::var_os("NO_COLOR").is_some(),
            ))
            .with_timer(Uptime::default())
            .try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
