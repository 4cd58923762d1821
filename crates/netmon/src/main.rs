//! netmon
//!
//! Prints the socket table or one network interface's counters.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use netmon::ProcNetLib;
use std::io;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "netmon")]
#[command(author, version, about = "Network monitor - socket table and interface statistics")]
#[command(long_about = "
Network monitor for the socket table and per-interface counters.

EXAMPLES:
    # Socket table
    netmon sock

    # Counters of one interface
    netmon eth0

    # Read tables from another directory
    netmon --proc-root /tmp/net eth0
")]
struct Args {
    /// sock, wifi or an interface name
    #[arg(value_name = "COMMAND")]
    command: Vec<String>,

    /// Directory holding the kernel network tables
    #[arg(long, value_name = "PATH", default_value = "/proc/net")]
    proc_root: std::path::PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("Failed to setup logging")?;
    debug!("Reading network tables from {}", args.proc_root.display());

    let netlib = ProcNetLib::with_root(args.proc_root);
    let code = netmon::run(
        &args.command,
        &netlib,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    );
    std::process::exit(code);
}
