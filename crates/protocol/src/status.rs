//! Status codes
//!
//! `UsbStatus` is the numeric status taxonomy shared with class drivers and
//! packed into enumeration-failure event codes. `TransferStatus` is what a
//! completion callback observes.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Numeric USB status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum UsbStatus {
    Success = 0,
    Error = 1,
    Busy = 2,
    InvalidHandle = 3,
    InvalidParameter = 4,
    InvalidRequest = 5,
    ControllerNotFound = 6,
    NotSupported = 8,
    Retry = 9,
    TransferStall = 10,
    TransferFailed = 11,
    AllocFail = 12,
    LackSwapBuffer = 13,
    TransferCancel = 14,
    BandwidthFail = 15,
}

impl UsbStatus {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        let status = match code {
            0 => Self::Success,
            1 => Self::Error,
            2 => Self::Busy,
            3 => Self::InvalidHandle,
            4 => Self::InvalidParameter,
            5 => Self::InvalidRequest,
            6 => Self::ControllerNotFound,
            8 => Self::NotSupported,
            9 => Self::Retry,
            10 => Self::TransferStall,
            11 => Self::TransferFailed,
            12 => Self::AllocFail,
            13 => Self::LackSwapBuffer,
            14 => Self::TransferCancel,
            15 => Self::BandwidthFail,
            other => {
                return Err(ProtocolError::InvalidValue {
                    field: "status",
                    value: u32::from(other),
                });
            }
        };
        Ok(status)
    }
}

/// Final status of a transfer, delivered only through its completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Transfer finished; the reported length is valid
    Success,
    /// Aborted by `cancel`, pipe close or device detach
    Canceled,
    /// Endpoint answered with STALL
    Stalled,
    /// Transaction error, babble, or NAK budget exhausted
    Failed,
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_usb_status(&self) -> UsbStatus {
        match self {
            Self::Success => UsbStatus::Success,
            Self::Canceled => UsbStatus::TransferCancel,
            Self::Stalled => UsbStatus::TransferStall,
            Self::Failed => UsbStatus::TransferFailed,
        }
    }
}
