//! contactdb-server - TCP command server for the contact record table
//!
//! Usage:
//!   contactdb-server [--host <addr>] [--port <port>] [--data-file <path>]
//!
//! Protocol: one UTF-8 request per connection, either a bare `shutdown`
//! token or a JSON object `{"command": "post"|"get", ...}`. The server
//! answers once and closes the connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};

use contactdb::{DataServer, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};

fn print_usage() {
    println!("contactdb-server {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("TCP command server for the contact record table");
    println!();
    println!("Usage: contactdb-server [--host <addr>] [--port <port>] [--data-file <path>]");
    println!();
    println!("Options:");
    println!("  --host         Listen address (default: {})", DEFAULT_HOST);
    println!("  --port         Listen port (default: {})", DEFAULT_PORT);
    println!("  --data-file    Path to the record table (default: data/records.csv)");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn parse_config(args: &[String]) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--host" => {
                config.host = iter
                    .next()
                    .context("--host requires a value")?
                    .to_string();
            }
            "--port" => {
                let value = iter.next().context("--port requires a value")?;
                config.port = value
                    .parse()
                    .with_context(|| format!("invalid port '{}'", value))?;
            }
            "--data-file" => {
                config.data_file = PathBuf::from(iter.next().context("--data-file requires a value")?);
            }
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("contactdb-server {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt().with_target(false).init();

    let config = parse_config(&args)?;
    let server = Arc::new(DataServer::new(config));

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
    let server_for_signals = Arc::clone(&server);
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "signal received, stopping");
            if let Err(e) = server_for_signals.stop() {
                error!(error = %e, "stop failed");
            }
        }
    });

    server.serve().context("server failed")?;
    Ok(())
}
