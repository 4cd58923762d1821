//! Suspend/resume and L1 sleep
//!
//! Every transition starts with a request call that only records the
//! request and hands it to the controller. The controller answers later with
//! a power outcome, which settles the state and is reported to the host
//! callback; callers never block on the bus.

use crate::backend::{PowerOutcome, PowerRequest};
use crate::error::{Failure, HostError, Result};
use crate::handle::DeviceHandle;
use crate::host::Host;
use protocol::HostEvent;
use tracing::info;

/// Per-device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Active,
    SuspendRequested,
    Suspended,
    ResumeRequested,
    L1SleepRequested,
    L1Sleeping,
    L1ResumeRequested,
}

impl PowerState {
    /// State after accepting `request`
    pub(crate) fn request(&self, request: PowerRequest) -> Result<Self> {
        let next = match (self, request) {
            (Self::Active, PowerRequest::Suspend) => Self::SuspendRequested,
            (Self::Suspended, PowerRequest::Resume) => Self::ResumeRequested,
            (Self::Active, PowerRequest::L1Sleep { .. }) => Self::L1SleepRequested,
            (Self::L1Sleeping, PowerRequest::L1Resume) => Self::L1ResumeRequested,
            _ => return Err(HostError::Error(Failure::InvalidRequest)),
        };
        Ok(next)
    }

    /// Settle a pending request; a failed request falls back to where it started
    pub(crate) fn resolve(&self, outcome: PowerOutcome) -> Option<(Self, HostEvent)> {
        let resolved = match (self, outcome) {
            (Self::SuspendRequested, PowerOutcome::Suspended) => {
                (Self::Suspended, HostEvent::Suspended)
            }
            (Self::SuspendRequested, PowerOutcome::SuspendFailed) => {
                (Self::Active, HostEvent::NotSuspended)
            }
            (Self::ResumeRequested, PowerOutcome::Resumed) => (Self::Active, HostEvent::Resumed),
            (Self::ResumeRequested, PowerOutcome::ResumeFailed) => {
                (Self::Suspended, HostEvent::NotResumed)
            }
            // Remote wake-up
            (Self::Suspended, PowerOutcome::ResumeDetected) => {
                (Self::Active, HostEvent::DetectResume)
            }
            (Self::L1SleepRequested, PowerOutcome::L1Ack) => {
                (Self::L1Sleeping, HostEvent::L1Sleeped)
            }
            (Self::L1SleepRequested, PowerOutcome::L1Nyet) => (Self::Active, HostEvent::L1SleepNyet),
            (Self::L1SleepRequested, PowerOutcome::L1Stall) => {
                (Self::Active, HostEvent::L1SleepNotSupported)
            }
            (Self::L1SleepRequested, PowerOutcome::L1Error) => {
                (Self::Active, HostEvent::L1SleepError)
            }
            (Self::L1ResumeRequested, PowerOutcome::L1Resumed) => {
                (Self::Active, HostEvent::L1Resumed)
            }
            (Self::L1ResumeRequested, PowerOutcome::L1ResumeFailed) => {
                (Self::L1Sleeping, HostEvent::L1NotResumed)
            }
            (Self::L1Sleeping, PowerOutcome::L1ResumeDetected) => {
                (Self::Active, HostEvent::L1DetectResume)
            }
            _ => return None,
        };
        Some(resolved)
    }
}

/// Link power management parameters
#[cfg(feature = "lpm")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpmParams {
    /// Host-initiated resume duration (HIRD), 0..=15
    pub hird: u8,
    /// Allow the device to wake the link
    pub remote_wakeup: bool,
}

#[cfg(feature = "lpm")]
impl Default for LpmParams {
    fn default() -> Self {
        Self {
            hird: 0,
            remote_wakeup: true,
        }
    }
}

impl Host {
    /// Ask the controller to suspend a device; settles with SUSPENDED or NOT_SUSPENDED
    pub fn suspend_device(&self, device: DeviceHandle) -> Result<()> {
        self.power_request(device, PowerRequest::Suspend)
    }

    /// Ask the controller to resume a suspended device
    pub fn resume_device(&self, device: DeviceHandle) -> Result<()> {
        self.power_request(device, PowerRequest::Resume)
    }

    /// Request L1 entry using the configured LPM parameters
    #[cfg(feature = "lpm")]
    pub fn l1_sleep_device(&self, device: DeviceHandle) -> Result<()> {
        let params = self.lock().lpm;
        self.power_request(
            device,
            PowerRequest::L1Sleep {
                hird: params.hird,
                remote_wakeup: params.remote_wakeup,
            },
        )
    }

    #[cfg(feature = "lpm")]
    pub fn l1_resume_device(&self, device: DeviceHandle) -> Result<()> {
        self.power_request(device, PowerRequest::L1Resume)
    }

    /// Set the parameters used by later L1 requests
    #[cfg(feature = "lpm")]
    pub fn configure_l1(&self, params: LpmParams) -> Result<()> {
        if params.hird > 15 {
            return Err(HostError::InvalidParameter("hird"));
        }
        let mut state = self.lock();
        if !state.power.lpm {
            return Err(HostError::NotSupported);
        }
        state.lpm = params;
        Ok(())
    }

    pub fn power_state(&self, device: DeviceHandle) -> Result<PowerState> {
        self.lock()
            .devices
            .get(device)
            .map(|d| d.power)
            .ok_or(HostError::InvalidHandle)
    }

    fn power_request(&self, device: DeviceHandle, request: PowerRequest) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.ensure_running()?;

        let enabled = match request {
            PowerRequest::Suspend | PowerRequest::Resume => state.power.low_power,
            PowerRequest::L1Sleep { .. } | PowerRequest::L1Resume => {
                state.power.low_power && state.power.lpm
            }
        };
        if !enabled {
            return Err(HostError::NotSupported);
        }

        let record = state
            .devices
            .get_mut(device)
            .filter(|d| d.is_settled())
            .ok_or(HostError::InvalidHandle)?;
        let next = record.power.request(request)?;
        state.controller.power_request(record.info.address, request)?;

        info!("Device {} power request {:?}", record.info.address, request);
        record.power = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_resume_cycle() {
        let state = PowerState::Active;
        let state = state.request(PowerRequest::Suspend).unwrap();
        assert_eq!(state, PowerState::SuspendRequested);

        let (state, event) = state.resolve(PowerOutcome::Suspended).unwrap();
        assert_eq!((state, event), (PowerState::Suspended, HostEvent::Suspended));

        let state = state.request(PowerRequest::Resume).unwrap();
        let (state, event) = state.resolve(PowerOutcome::ResumeFailed).unwrap();
        assert_eq!((state, event), (PowerState::Suspended, HostEvent::NotResumed));
    }

    #[test]
    fn test_requests_out_of_order_are_rejected() {
        assert_eq!(
            PowerState::Active.request(PowerRequest::Resume),
            Err(HostError::Error(Failure::InvalidRequest))
        );
        assert!(PowerState::SuspendRequested.request(PowerRequest::Suspend).is_err());
        assert!(PowerState::Suspended.request(PowerRequest::L1Resume).is_err());
    }

    #[test]
    fn test_l1_outcomes() {
        let pending = PowerState::Active
            .request(PowerRequest::L1Sleep {
                hird: 4,
                remote_wakeup: true,
            })
            .unwrap();
        assert_eq!(
            pending.resolve(PowerOutcome::L1Nyet),
            Some((PowerState::Active, HostEvent::L1SleepNyet))
        );
        assert_eq!(
            pending.resolve(PowerOutcome::L1Stall),
            Some((PowerState::Active, HostEvent::L1SleepNotSupported))
        );
        assert_eq!(
            pending.resolve(PowerOutcome::L1Ack),
            Some((PowerState::L1Sleeping, HostEvent::L1Sleeped))
        );
        assert_eq!(
            PowerState::L1Sleeping.resolve(PowerOutcome::L1ResumeDetected),
            Some((PowerState::Active, HostEvent::L1DetectResume))
        );
    }

    #[test]
    fn test_unsolicited_outcome_ignored() {
        assert_eq!(PowerState::Active.resolve(PowerOutcome::Resumed), None);
    }
}
