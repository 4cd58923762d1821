//! `/proc/net` backed statistics
//!
//! Socket rows come from the `tcp`, `udp` and `raw` tables (plus their IPv6
//! variants when present); interface counters come from `dev`; protocol
//! counters come from `snmp`.

use crate::netlib::{DevStats, NetLib, NetLibError, ProtocolStats};
use std::fmt::Write as _;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const SOCKET_TABLES: [(&str, Protocol, IpType); 6] = [
    ("tcp", Protocol::Tcp, IpType::V4),
    ("tcp6", Protocol::Tcp, IpType::V6),
    ("udp", Protocol::Udp, IpType::V4),
    ("udp6", Protocol::Udp, IpType::V6),
    ("raw", Protocol::Raw, IpType::V4),
    ("raw6", Protocol::Raw, IpType::V6),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Tcp,
    Udp,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpType {
    V4,
    V6,
}

impl IpType {
    fn label(self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

/// Reads the kernel's `/proc/net` tables
#[derive(Debug, Clone)]
pub struct ProcNetLib {
    root: PathBuf,
}

impl Default for ProcNetLib {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcNetLib {
    pub fn new() -> Self {
        Self::with_root("/proc/net")
    }

    /// Read tables from `root` instead of `/proc/net`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl NetLib for ProcNetLib {
    fn sockets(&self) -> Result<String, NetLibError> {
        let mut table = String::new();
        let mut read_any = false;
        let mut last_error = None;

        for (file, protocol, ip_type) in SOCKET_TABLES {
            let path = self.root.join(file);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    trace!("Skipping {}: {}", path.display(), e);
                    last_error = Some(e);
                    continue;
                }
            };
            read_any = true;

            // First line is the column header
            for line in content.lines().skip(1).filter(|l| !l.trim().is_empty()) {
                let row = SocketRow::parse(line, ip_type).ok_or_else(|| NetLibError::Parse {
                    file: file.to_string(),
                    reason: format!("bad socket line '{}'", line.trim()),
                })?;
                let _ = writeln!(table, "{}", row.format(protocol));
            }
        }

        match last_error {
            Some(e) if !read_any => Err(NetLibError::Io(e)),
            _ => Ok(table.trim_end().to_string()),
        }
    }

    fn device_stats(&self, stats: &mut DevStats) -> Result<(), NetLibError> {
        let path = self.root.join("dev");
        let content = fs::read_to_string(&path)?;

        // Two header lines precede the per-interface rows
        for line in content.lines().skip(2) {
            let Some((name, counters)) = line.split_once(':') else {
                continue;
            };
            if name.trim() != stats.name {
                continue;
            }

            let fields: Vec<u64> = counters
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|e| NetLibError::Parse {
                    file: "dev".to_string(),
                    reason: format!("{}: {}", stats.name, e),
                })?;
            if fields.len() < 10 {
                return Err(NetLibError::Parse {
                    file: "dev".to_string(),
                    reason: format!("{}: {} counters, expected 16", stats.name, fields.len()),
                });
            }

            stats.rx_bytes = fields[0];
            stats.rx_packets = fields[1];
            stats.tx_bytes = fields[8];
            stats.tx_packets = fields[9];
            debug!("Read counters of {} from {}", stats.name, path.display());
            return Ok(());
        }

        Err(NetLibError::NoSuchInterface(stats.name.clone()))
    }

    fn protocol_stats(&self) -> Result<Vec<ProtocolStats>, NetLibError> {
        let path = self.root.join("snmp");
        let content = fs::read_to_string(&path)?;
        let stats = parse_snmp(&content)?;
        debug!("Read {} protocol blocks from {}", stats.len(), path.display());
        Ok(stats)
    }
}

/// `snmp` lists each protocol as a name line followed by a value line:
/// `Tcp: RtoAlgorithm RtoMin ...` then `Tcp: 1 200 ...`
fn parse_snmp(content: &str) -> Result<Vec<ProtocolStats>, NetLibError> {
    let malformed = |reason: String| NetLibError::Parse {
        file: "snmp".to_string(),
        reason,
    };

    let mut stats = Vec::new();
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    while let Some(header) = lines.next() {
        let (protocol, names) = header
            .split_once(':')
            .ok_or_else(|| malformed(format!("bad header '{}'", header.trim())))?;
        let values = lines
            .next()
            .and_then(|line| line.split_once(':'))
            .filter(|(p, _)| *p == protocol)
            .map(|(_, values)| values)
            .ok_or_else(|| malformed(format!("{} has no value line", protocol)))?;

        let names: Vec<&str> = names.split_whitespace().collect();
        let values: Vec<i64> = values
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|e| malformed(format!("{}: {}", protocol, e)))?;
        if names.len() != values.len() {
            return Err(malformed(format!(
                "{}: {} names for {} values",
                protocol,
                names.len(),
                values.len()
            )));
        }

        stats.push(ProtocolStats {
            protocol: protocol.to_string(),
            counters: names
                .into_iter()
                .map(str::to_string)
                .zip(values)
                .collect(),
        });
    }
    Ok(stats)
}

/// One row of a `/proc/net/{tcp,udp,raw}` table
#[derive(Debug, Clone, PartialEq, Eq)]
struct SocketRow {
    ip_type: IpType,
    local: (String, u16),
    remote: (String, u16),
    state: u8,
    inode: u64,
    uid: u32,
}

impl SocketRow {
    /// `sl local rem st tx:rx tr:when retrnsmt uid timeout inode ...`
    fn parse(line: &str, ip_type: IpType) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return None;
        }

        Some(Self {
            ip_type,
            local: parse_endpoint(fields[1], ip_type)?,
            remote: parse_endpoint(fields[2], ip_type)?,
            state: u8::from_str_radix(fields[3], 16).ok()?,
            uid: fields[7].parse().ok()?,
            inode: fields[9].parse().ok()?,
        })
    }

    fn connected(&self) -> bool {
        self.remote.1 != 0
    }

    fn format(&self, protocol: Protocol) -> String {
        let conn = if self.connected() {
            "connected"
        } else {
            "unconnected"
        };
        let owner = format!("uid:{}", self.uid);
        match protocol {
            Protocol::Tcp => format!(
                "TCP\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                self.inode,
                owner,
                conn,
                self.ip_type.label(),
                tcp_state(self.state),
                self.local.0,
                self.local.1,
                self.remote.0,
                self.remote.1
            ),
            Protocol::Udp => format!(
                "UDP\t{}\t{}\t{}\t{}\t0x{:02x}\t{}\t{}\t{}\t{}",
                self.inode,
                owner,
                conn,
                self.ip_type.label(),
                self.state,
                self.local.0,
                self.local.1,
                self.remote.0,
                self.remote.1
            ),
            // The local "port" of a raw socket is its protocol number
            Protocol::Raw => format!(
                "RAW\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                self.inode,
                owner,
                conn,
                self.ip_type.label(),
                self.local.1,
                self.local.0,
                self.remote.0
            ),
        }
    }
}

/// `0100007F:0035` → ("127.0.0.1", 53)
fn parse_endpoint(field: &str, ip_type: IpType) -> Option<(String, u16)> {
    let (address, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;

    let address = match ip_type {
        IpType::V4 => {
            let raw = u32::from_str_radix(address, 16).ok()?;
            // Network byte order printed as a host-order (little-endian) word
            Ipv4Addr::from(raw.to_le_bytes()).to_string()
        }
        IpType::V6 => {
            if address.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&address[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            Ipv6Addr::from(octets).to_string()
        }
    };
    Some((address, port))
}

fn tcp_state(state: u8) -> &'static str {
    match state {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}
