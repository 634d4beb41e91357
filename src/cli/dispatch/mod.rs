use crate::{
    cli::actions::{Action, ProbeSettings},
    exporter::{DEFAULT_CONCURRENCY, DEFAULT_PORT},
    tls::{DEFAULT_CA_FILE, ProbeTarget},
};
use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use std::{net::IpAddr, path::PathBuf};

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if the listen address is invalid or neither `--target`
/// nor `--config` was given
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    // Extract targets given on the command line
    let targets: Vec<ProbeTarget> = matches
        .get_many::<ProbeTarget>("target")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let config = matches.get_one::<PathBuf>("config").cloned();

    if targets.is_empty() && config.is_none() {
        bail!("no targets configured, use --target or --config");
    }

    let ca_file = matches
        .get_one::<PathBuf>("ca-file")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_FILE));

    let concurrency = matches
        .get_one::<usize>("concurrency")
        .copied()
        .unwrap_or(DEFAULT_CONCURRENCY);

    if concurrency == 0 {
        bail!("concurrency must be at least 1");
    }

    let settings = ProbeSettings {
        ca_file,
        config,
        targets,
        concurrency,
    };

    if matches.get_flag("once") {
        return Ok(Action::Once { settings });
    }

    // Extract and validate listen address
    let listen = matches
        .get_one::<String>("listen")
        .map(|addr| {
            addr.parse::<IpAddr>()
                .with_context(|| format!("Invalid IP address: {addr}"))
        })
        .transpose()?;

    // Extract port with default
    let port = matches.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT);

    Ok(Action::Serve {
        settings,
        listen,
        port,
    })
}
