//! Host error types

use protocol::UsbStatus;
use thiserror::Error;

/// Generic backend failure behind [`HostError::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("no idle pipe")]
    NoIdlePipe,

    #[error("no free transfer descriptor")]
    NoFreeDescriptor,

    #[error("insufficient periodic bandwidth")]
    InsufficientBandwidth,

    #[error("request invalid in the current state")]
    InvalidRequest,

    #[error("host is not running")]
    NotRunning,

    #[error("event queue full")]
    EventQueueFull,
}

/// Errors returned synchronously by host operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("not supported")]
    NotSupported,

    #[error("controller not found: {0}")]
    ControllerNotFound(String),

    #[error("allocation failed: pool exhausted")]
    AllocFail,

    #[error("no swap buffer available")]
    LackSwapBuffer,

    #[error("{0}")]
    Error(Failure),
}

impl HostError {
    /// Numeric status for class drivers that speak status codes
    pub fn status(&self) -> UsbStatus {
        match self {
            Self::InvalidHandle => UsbStatus::InvalidHandle,
            Self::InvalidParameter(_) => UsbStatus::InvalidParameter,
            Self::NotSupported => UsbStatus::NotSupported,
            Self::ControllerNotFound(_) => UsbStatus::ControllerNotFound,
            Self::AllocFail => UsbStatus::AllocFail,
            Self::LackSwapBuffer => UsbStatus::LackSwapBuffer,
            Self::Error(Failure::InsufficientBandwidth) => UsbStatus::BandwidthFail,
            Self::Error(Failure::InvalidRequest) => UsbStatus::InvalidRequest,
            Self::Error(_) => UsbStatus::Error,
        }
    }

    /// Transient shortage that clears once an in-flight transfer retires
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::LackSwapBuffer | Self::Error(Failure::NoFreeDescriptor)
        )
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
