use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use log::LevelFilter;
use std::io::Write;

/// Map the `-v` count to a level, warnings are always shown
#[must_use]
pub const fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize `env_logger`, `RUST_LOG` takes precedence over `level`
///
/// # Errors
///
/// Returns an error if a logger is already installed
pub fn init(level: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    // rustls stays at warn below -vvv
    if level < LevelFilter::Trace {
        builder.filter_module("rustls", level.min(LevelFilter::Warn));
    }

    builder
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                record.level(),
                record.args()
            )
        });

    builder.try_init().context("failed to initialize logger")
}
