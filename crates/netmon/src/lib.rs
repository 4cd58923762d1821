//! `netmon` command
//!
//! `netmon sock` prints the socket table, `netmon <devname>` prints one
//! interface's counters and `netmon wifi` reports that the Wi-Fi manager is
//! not built in. Anything else prints the usage text.
//!
//! `netstats` dumps the stack-wide protocol counters.

pub mod netlib;
pub mod procfs;
pub mod report;

pub use netlib::{DevStats, IFNAMSIZ, NetLib, NetLibError, ProtocolStats};
pub use procfs::ProcNetLib;

use std::io::{self, Write};
use tracing::{debug, error};

/// Exit status of a successful command
pub const OK: i32 = 0;
/// Exit status of a failed command
pub const ERROR: i32 = -1;

/// Run `netmon` with `args` (program name excluded)
///
/// Regular output goes to `out`, failure messages to `err`.
pub fn run(
    args: &[String],
    netlib: &dyn NetLib,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    match dispatch(args, netlib, out, err) {
        Ok(code) => code,
        Err(e) => {
            error!("Failed to write netmon output: {}", e);
            ERROR
        }
    }
}

/// Run `netstats`
///
/// Always exits with [`OK`]; a missing counter source is only reported on
/// `err`.
pub fn netstats(netlib: &dyn NetLib, out: &mut dyn Write, err: &mut dyn Write) -> i32 {
    let written = match netlib.protocol_stats() {
        Ok(stats) => report::protocol_stats(out, &stats),
        Err(e) => {
            debug!("Protocol counters unavailable: {}", e);
            writeln!(err, "Failed to fetch network stats.")
        }
    };
    if let Err(e) = written {
        error!("Failed to write netstats output: {}", e);
    }
    OK
}

fn dispatch(
    args: &[String],
    netlib: &dyn NetLib,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<i32> {
    let [command] = args else {
        report::usage(out)?;
        return Ok(OK);
    };

    match command.as_str() {
        "sock" => {
            match netlib.sockets() {
                Ok(table) => report::sockets(out, &table)?,
                Err(e) => {
                    debug!("Socket table unavailable: {}", e);
                    writeln!(err, "Failed to fetch socket info.")?;
                }
            }
            Ok(OK)
        }
        "wifi" => {
            writeln!(err, "Wi-Fi Manager is not enabled")?;
            Ok(ERROR)
        }
        interface => {
            let mut stats = DevStats::named(interface);
            match netlib.device_stats(&mut stats) {
                Ok(()) => {
                    report::device_stats(out, &stats)?;
                    Ok(OK)
                }
                Err(e) => {
                    debug!("Stats for {} unavailable: {}", interface, e);
                    writeln!(err, "No device interface {}", interface)?;
                    Ok(ERROR)
                }
            }
        }
    }
}
