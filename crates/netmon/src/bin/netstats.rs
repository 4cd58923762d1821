//! netstats
//!
//! Prints the stack-wide protocol counters.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use netmon::ProcNetLib;
use std::io;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "netstats")]
#[command(author, version, about = "Network stack protocol counters")]
struct Args {
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
    debug!("Reading protocol counters from {}", args.proc_root.display());

    let netlib = ProcNetLib::with_root(args.proc_root);
    let code = netmon::netstats(
        &netlib,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    );
    std::process::exit(code);
}
