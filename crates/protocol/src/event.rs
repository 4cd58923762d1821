//! Host-level event codes
//!
//! Codes follow the controller-header numbering with the low-power block
//! always counted, so a code means the same thing whether or not power
//! management is compiled in. `EnumerationFailed` carries its failure
//! reason in the upper 16 bits of the code.

use crate::error::{ProtocolError, Result};
use crate::status::UsbStatus;
use serde::{Deserialize, Serialize};

const ENUM_FAIL_CODE: u32 = 3;

/// Event delivered to the host callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostEvent {
    /// Device is attached
    Attached,
    /// Device is detached
    Detached,
    /// Enumeration failed; the reason is packed into the event code
    EnumerationFailed(UsbStatus),
    /// Suspend failed
    NotSuspended,
    /// Suspend successful
    Suspended,
    /// Resume failed
    NotResumed,
    /// Resume signalling detected on the bus
    DetectResume,
    /// Resume successful
    Resumed,
    /// L1 entry acknowledged (ACK)
    L1Sleeped,
    /// Device could not enter L1 right now (NYET)
    L1SleepNyet,
    /// Device does not support L1 (STALL)
    L1SleepNotSupported,
    /// Device failed to respond to the L1 request
    L1SleepError,
    /// L1 resume failed
    L1NotResumed,
    /// L1 resume signalling detected
    L1DetectResume,
    /// L1 resume successful
    L1Resumed,
    /// Hub is attached
    HubAttached,
    /// Hub is detached
    HubDetached,
}

impl HostEvent {
    /// Numeric event code
    pub fn code(&self) -> u32 {
        match self {
            Self::Attached => 1,
            Self::Detached => 2,
            Self::EnumerationFailed(reason) => ENUM_FAIL_CODE | (u32::from(reason.code()) << 16),
            Self::NotSuspended => 4,
            Self::Suspended => 5,
            Self::NotResumed => 6,
            Self::DetectResume => 7,
            Self::Resumed => 8,
            Self::L1Sleeped => 9,
            Self::L1SleepNyet => 10,
            Self::L1SleepNotSupported => 11,
            Self::L1SleepError => 12,
            Self::L1NotResumed => 13,
            Self::L1DetectResume => 14,
            Self::L1Resumed => 15,
            Self::HubAttached => 16,
            Self::HubDetached => 17,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        let event = match code & 0xFFFF {
            1 => Self::Attached,
            2 => Self::Detached,
            ENUM_FAIL_CODE => {
                return UsbStatus::from_code((code >> 16) as u16)
                    .map(Self::EnumerationFailed)
                    .map_err(|_| ProtocolError::UnknownEvent(code));
            }
            4 => Self::NotSuspended,
            5 => Self::Suspended,
            6 => Self::NotResumed,
            7 => Self::DetectResume,
            8 => Self::Resumed,
            9 => Self::L1Sleeped,
            10 => Self::L1SleepNyet,
            11 => Self::L1SleepNotSupported,
            12 => Self::L1SleepError,
            13 => Self::L1NotResumed,
            14 => Self::L1DetectResume,
            15 => Self::L1Resumed,
            16 => Self::HubAttached,
            17 => Self::HubDetached,
            _ => return Err(ProtocolError::UnknownEvent(code)),
        };

        if code >> 16 != 0 {
            return Err(ProtocolError::UnknownEvent(code));
        }
        Ok(event)
    }

    /// Attach or detach of a hub rather than a leaf device
    pub fn is_hub_event(&self) -> bool {
        matches!(self, Self::HubAttached | Self::HubDetached)
    }

    /// Events produced by the power state machine
    pub fn is_power_event(&self) -> bool {
        (4..=15).contains(&self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_fail_packs_reason() {
        let event = HostEvent::EnumerationFailed(UsbStatus::AllocFail);
        assert_eq!(event.code(), 0x000C_0003);
        assert_eq!(HostEvent::from_code(0x000C_0003).unwrap(), event);
    }

    #[test]
    fn test_hub_codes_follow_power_block() {
        assert_eq!(HostEvent::HubAttached.code(), 16);
        assert_eq!(HostEvent::HubDetached.code(), 17);
        assert!(HostEvent::HubDetached.is_hub_event());
        assert!(!HostEvent::Detached.is_hub_event());
    }

    #[test]
    fn test_power_event_range() {
        assert!(HostEvent::Suspended.is_power_event());
        assert!(HostEvent::L1Resumed.is_power_event());
        assert!(!HostEvent::Attached.is_power_event());
        assert!(!HostEvent::HubAttached.is_power_event());
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(HostEvent::from_code(0), Err(ProtocolError::UnknownEvent(0)));
        assert!(HostEvent::from_code(18).is_err());
        // only ENUM_FAIL may carry an upper half
        assert!(HostEvent::from_code(0x0001_0001).is_err());
        // reason code 7 is unassigned
        assert!(HostEvent::from_code(0x0007_0003).is_err());
    }
}
