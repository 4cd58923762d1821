//! Network statistics source

use thiserror::Error;

/// Longest interface name the stats record holds
pub const IFNAMSIZ: usize = 16;

#[derive(Debug, Error)]
pub enum NetLibError {
    #[error("no device interface {0}")]
    NoSuchInterface(String),

    #[error("malformed {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters of one network interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevStats {
    /// Interface name, at most [`IFNAMSIZ`] bytes
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl DevStats {
    /// Empty record for `name`, truncated to [`IFNAMSIZ`] bytes
    pub fn named(name: &str) -> Self {
        Self {
            name: truncate_name(name).to_string(),
            ..Self::default()
        }
    }
}

/// Counters of one protocol layer (`Ip`, `Tcp`, `Udp`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub protocol: String,
    /// Counter name and value, in the order the stack reports them
    pub counters: Vec<(String, i64)>,
}

impl ProtocolStats {
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters
            .iter()
            .find(|(counter, _)| counter == name)
            .map(|(_, value)| *value)
    }
}

/// Cut an interface name to [`IFNAMSIZ`] bytes on a character boundary
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= IFNAMSIZ {
        return name;
    }
    let mut end = IFNAMSIZ;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Where `netmon` gets its numbers from
pub trait NetLib {
    /// Preformatted socket table, one socket per line
    fn sockets(&self) -> Result<String, NetLibError>;

    /// Counters of the interface named in `stats`, filled in place
    fn device_stats(&self, stats: &mut DevStats) -> Result<(), NetLibError>;

    /// Stack-wide counters, one entry per protocol layer
    fn protocol_stats(&self) -> Result<Vec<ProtocolStats>, NetLibError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_names_are_truncated() {
        assert_eq!(DevStats::named("eth0").name, "eth0");
        assert_eq!(
            DevStats::named("a-very-long-interface-name").name,
            "a-very-long-inte"
        );
        assert_eq!(truncate_name("ééééééééé").len(), 16);
    }
}
