//! Output tables

use crate::netlib::{DevStats, ProtocolStats};
use std::io::{self, Write};

const RULE: &str = "==============================================";
const SEPARATOR: &str = "----------------------------------------------";

const USAGE: &str = "
 usage: netmon [options]

 socket information:
       netmon sock

 WiFi Manager stats:
       netmon wifi

 Net device stats:
       netmon [devname]
";

pub fn usage(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{}", USAGE)
}

/// Socket table with its column legend
pub fn sockets(out: &mut dyn Write, table: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(
        out,
        "TCP\tfd\tpname:pid\tconn state\tIP type\tTCP state\tlocal IP\tlocal port\tremote IP\tremote port"
    )?;
    writeln!(
        out,
        "UDP\tfd\tpname:pid\tconn state\tIP type\tUDP flag\tlocal IP\tlocal port\tremote IP\tremote port"
    )?;
    writeln!(out, "RAW\tfd\tpname:pid\tconn state\tIP type\tprotocol\tlocal IP\tremote IP")?;
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(out, "{}", table)?;
    writeln!(out, "{}", RULE)
}

pub fn device_stats(out: &mut dyn Write, stats: &DevStats) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "IFNAME    RXbyte    RXPKT    TXbyte    TXPKT")?;
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(
        out,
        "{:<10}{:<10}{:<9}{:<10}{:<9}",
        stats.name, stats.rx_bytes, stats.rx_packets, stats.tx_bytes, stats.tx_packets
    )?;
    writeln!(out, "{}", RULE)
}

/// Stack-wide counters, one block per protocol
pub fn protocol_stats(out: &mut dyn Write, stats: &[ProtocolStats]) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    for (i, block) in stats.iter().enumerate() {
        if i > 0 {
            writeln!(out, "{}", SEPARATOR)?;
        }
        writeln!(out, "{}", block.protocol)?;
        for (name, value) in &block.counters {
            writeln!(out, "  {:<24}{}", name, value)?;
        }
    }
    writeln!(out, "{}", RULE)
}
