use crate::tls::{DEFAULT_CA_FILE, ProbeTarget};
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

/// Pure clap command definitions with zero business logic
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("target")
                .action(ArgAction::Append)
                .env("CERTPULSE_TARGETS")
                .help("endpoint to probe, <host>[:port], repeatable")
                .long("target")
                .long_help(
                    "Endpoint to probe as <host>[:port], port defaults to 443.\n\
                    Repeat the flag for several endpoints, or use a comma separated\n\
                    list in CERTPULSE_TARGETS. IPv6 literals with a port need brackets:\n\
                    '[2001:db8::1]:8443'.\n\n\
                    Each target gets the label target=<host>."
                )
                .short('t')
                .value_delimiter(',')
                .value_name("HOST")
                .value_parser(clap::value_parser!(ProbeTarget)),
        )
        .arg(
            Arg::new("config")
                .env("CERTPULSE_CONFIG")
                .help("TOML file with [[targets]]")
                .long("config")
                .long_help(
                    "TOML file listing the targets to probe:\n\n\
                    [defaults]\n\
                    port = 443\n\
                    timeout = 10\n\n\
                    [[targets]]\n\
                    hostname = \"bmc01.example.com\"\n\n\
                    [targets.labels]\n\
                    target = \"bmc01\""
                )
                .short('c')
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ca-file")
                .default_value(DEFAULT_CA_FILE)
                .env("CERTPULSE_CA_FILE")
                .help("PEM file with trust anchors added to the platform roots")
                .long("ca-file")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("listen")
                .env("CERTPULSE_LISTEN")
                .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                .long("listen")
                .long_help(
                    "IP address to bind to:\n\
                    Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                    Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                    Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                    Specific IPv6: '::', '::1'"
                )
                .short('l')
                .value_name("IP"),
        )
        .arg(
            Arg::new("port")
                .default_value("9220")
                .env("CERTPULSE_PORT")
                .help("listening port for /metrics")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("concurrency")
                .default_value("8")
                .env("CERTPULSE_CONCURRENCY")
                .help("maximum number of probes in flight")
                .long("concurrency")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("once")
                .action(ArgAction::SetTrue)
                .help("probe every target once, print JSON lines and exit")
                .long("once"),
        )
        .arg(
            Arg::new("verbose")
                .action(ArgAction::Count)
                .help("increase log verbosity (-v info, -vv debug, -vvv trace)")
                .long("verbose")
                .short('v'),
        )
}
