//! Power Management Tests
//!
//! Tests for suspend/resume and L1 sleep requests covering:
//! - Request/outcome state transitions and the events they report
//! - Requests refused in the wrong state or with power support disabled
//! - Register-model controllers refusing L1
//!
//! Run with: `cargo test -p host --test power_tests`

#![cfg(feature = "low-power")]

use host::test_utils::{
    RecordingHostCallback, ScriptedHardware, bulk_device, full_speed_device, test_config,
    test_host_with,
};
use host::{DeviceHandle, Failure, Host, HostConfig, HostError, PowerOutcome, PowerState};
use protocol::HostEvent;

fn attached(config: HostConfig) -> (Host, RecordingHostCallback, ScriptedHardware, DeviceHandle) {
    let description = if config.host.controller == "khci" {
        full_speed_device(1)
    } else {
        bulk_device(1)
    };
    let (host, callback, hardware) = test_host_with(config, RecordingHostCallback::new());
    hardware.attach(description).unwrap();
    host.task_once();
    let device = callback.last_attached().unwrap();
    (host, callback, hardware, device)
}

fn last_event(callback: &RecordingHostCallback) -> Option<HostEvent> {
    callback.events().last().copied()
}

// ============================================================================
// Suspend and resume
// ============================================================================

#[test]
fn test_suspend_resume_cycle() {
    let (host, callback, hardware, device) = attached(test_config("ehci"));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);

    host.suspend_device(device).unwrap();
    assert_eq!(host.power_state(device).unwrap(), PowerState::SuspendRequested);

    hardware.power(1, PowerOutcome::Suspended).unwrap();
    host.task_once();
    assert_eq!(last_event(&callback), Some(HostEvent::Suspended));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Suspended);

    host.resume_device(device).unwrap();
    hardware.power(1, PowerOutcome::Resumed).unwrap();
    host.task_once();
    assert_eq!(last_event(&callback), Some(HostEvent::Resumed));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
}

#[test]
fn test_failed_suspend_returns_to_active() {
    let (host, callback, hardware, device) = attached(test_config("khci"));

    host.suspend_device(device).unwrap();
    hardware.power(1, PowerOutcome::SuspendFailed).unwrap();
    host.task_once();

    assert_eq!(last_event(&callback), Some(HostEvent::NotSuspended));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
}

#[test]
fn test_remote_wakeup() {
    let (host, callback, hardware, device) = attached(test_config("ehci"));
    host.suspend_device(device).unwrap();
    hardware.power(1, PowerOutcome::Suspended).unwrap();
    hardware.power(1, PowerOutcome::ResumeDetected).unwrap();
    host.task_once();

    assert_eq!(last_event(&callback), Some(HostEvent::DetectResume));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
}

#[test]
fn test_requests_in_wrong_state() {
    let (host, _callback, _hardware, device) = attached(test_config("ehci"));

    assert_eq!(
        host.resume_device(device),
        Err(HostError::Error(Failure::InvalidRequest))
    );

    host.suspend_device(device).unwrap();
    assert_eq!(
        host.suspend_device(device),
        Err(HostError::Error(Failure::InvalidRequest))
    );
}

#[test]
fn test_unsolicited_outcome_is_dropped() {
    let (host, callback, hardware, device) = attached(test_config("ehci"));

    hardware.power(1, PowerOutcome::Resumed).unwrap();
    hardware.power(9, PowerOutcome::Suspended).unwrap();
    host.task_once();

    assert_eq!(callback.events(), vec![HostEvent::Attached]);
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
}

#[test]
fn test_low_power_disabled() {
    let mut config = test_config("ehci");
    config.power.low_power = false;
    config.power.lpm = false;
    let (host, _callback, _hardware, device) = attached(config);

    assert_eq!(host.suspend_device(device), Err(HostError::NotSupported));
    assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
}

#[test]
fn test_power_request_on_detached_device() {
    let (host, _callback, hardware, device) = attached(test_config("ehci"));
    hardware.detach(1).unwrap();
    host.task_once();

    assert_eq!(host.suspend_device(device), Err(HostError::InvalidHandle));
    assert_eq!(host.power_state(device), Err(HostError::InvalidHandle));
}

// ============================================================================
// L1 sleep
// ============================================================================

#[cfg(feature = "lpm")]
mod lpm {
    use super::*;
    use host::LpmParams;

    #[test]
    fn test_l1_sleep_and_resume() {
        let (host, callback, hardware, device) = attached(test_config("ehci"));
        host.configure_l1(LpmParams {
            hird: 4,
            remote_wakeup: false,
        })
        .unwrap();

        host.l1_sleep_device(device).unwrap();
        assert_eq!(host.power_state(device).unwrap(), PowerState::L1SleepRequested);
        hardware.power(1, PowerOutcome::L1Nyet).unwrap();
        host.task_once();
        assert_eq!(last_event(&callback), Some(HostEvent::L1SleepNyet));
        assert_eq!(host.power_state(device).unwrap(), PowerState::Active);

        host.l1_sleep_device(device).unwrap();
        hardware.power(1, PowerOutcome::L1Ack).unwrap();
        host.task_once();
        assert_eq!(last_event(&callback), Some(HostEvent::L1Sleeped));
        assert_eq!(host.power_state(device).unwrap(), PowerState::L1Sleeping);

        host.l1_resume_device(device).unwrap();
        hardware.power(1, PowerOutcome::L1Resumed).unwrap();
        host.task_once();
        assert_eq!(last_event(&callback), Some(HostEvent::L1Resumed));
        assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
    }

    #[test]
    fn test_l1_stall_means_not_supported() {
        let (host, callback, hardware, device) = attached(test_config("ip3516hs"));
        host.l1_sleep_device(device).unwrap();
        hardware.power(1, PowerOutcome::L1Stall).unwrap();
        host.task_once();

        assert_eq!(last_event(&callback), Some(HostEvent::L1SleepNotSupported));
        assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
    }

    #[test]
    fn test_hird_range() {
        let (host, _callback, _hardware, _device) = attached(test_config("ehci"));
        assert_eq!(
            host.configure_l1(LpmParams {
                hird: 16,
                remote_wakeup: true
            }),
            Err(HostError::InvalidParameter("hird"))
        );
        assert!(host
            .configure_l1(LpmParams {
                hird: 15,
                remote_wakeup: true
            })
            .is_ok());
    }

    #[test]
    fn test_register_controller_refuses_l1() {
        let (host, _callback, _hardware, device) = attached(test_config("khci"));

        assert_eq!(host.l1_sleep_device(device), Err(HostError::NotSupported));
        assert_eq!(host.power_state(device).unwrap(), PowerState::Active);
    }

    #[test]
    fn test_lpm_disabled() {
        let mut config = test_config("ehci");
        config.power.lpm = false;
        let (host, _callback, _hardware, device) = attached(config);

        assert_eq!(
            host.configure_l1(LpmParams::default()),
            Err(HostError::NotSupported)
        );
        assert_eq!(host.l1_sleep_device(device), Err(HostError::NotSupported));
        // Suspend is still available
        assert!(host.suspend_device(device).is_ok());
    }
}
