//! Protocol error types

use thiserror::Error;

/// Errors decoding USB wire-level values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Value outside the range of the named field
    #[error("Invalid {field} value: {value:#x}")]
    InvalidValue { field: &'static str, value: u32 },

    /// Host event code that does not map onto a known event
    #[error("Unknown host event code: {0:#x}")]
    UnknownEvent(u32),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BufferTooSmall {
            needed: 8,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("needed 8"));
        assert!(msg.contains("got 3"));

        let msg = format!("{}", ProtocolError::UnknownEvent(0x42));
        assert!(msg.contains("0x42"));
    }
}
