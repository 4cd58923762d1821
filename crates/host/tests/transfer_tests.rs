//! Transfer Queue Tests
//!
//! Tests for pipes and transfers covering:
//! - Control, bulk and interrupt transfers on both controller models
//! - Queue ordering and pumping after retirement
//! - Cancellation and close semantics
//! - NAK retry budgets and data toggle tracking
//! - Resource exhaustion (transfer pool, swap buffers, descriptors, bandwidth)
//! - Async submission
//!
//! Run with: `cargo test -p host --test transfer_tests`

use host::test_utils::{
    CompletionLog, Journal, JournalEntry, RecordingHostCallback, ScriptedHardware, bulk_device,
    full_speed_device, test_config, test_host, test_host_with,
};
use host::{
    BackendResult, Completion, DeviceHandle, Failure, Host, HostConfig, HostError, PipeInit,
    PipeState, TransferRequest, TransferState,
};
use protocol::{HostEvent, SetupPacket, TransferStatus};

fn attached(controller: &str) -> (Host, ScriptedHardware, DeviceHandle) {
    attached_with(test_config(controller))
}

fn attached_with(config: HostConfig) -> (Host, ScriptedHardware, DeviceHandle) {
    let register_model = config.host.controller == "khci";
    let (host, callback, hardware) = test_host_with(config, RecordingHostCallback::new());
    let description = if register_model {
        full_speed_device(1)
    } else {
        bulk_device(1)
    };
    hardware.attach(description).unwrap();
    host.task_once();
    let device = callback.last_attached().unwrap();
    (host, hardware, device)
}

fn ignore(_: Completion) {}

// ============================================================================
// Control transfers
// ============================================================================

#[test]
fn test_get_descriptor_on_ring_controller() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::control(64)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let log = CompletionLog::new();

    let setup = SetupPacket::get_descriptor(0x01, 0, 18);
    host.send_setup(pipe, transfer, setup, TransferRequest::new(vec![0; 18], log.callback()))
        .unwrap();
    assert_eq!(host.transfer_state(transfer), Some(TransferState::InFlight));

    let descriptor: Vec<u8> = (0..18).collect();
    hardware.complete_with_data(transfer, &descriptor).unwrap();
    host.task_once();

    let completions = log.completions();
    assert_eq!(completions.len(), 1);
    let completion = &completions[0];
    assert_eq!(completion.status, TransferStatus::Success);
    assert_eq!(completion.pipe, pipe);
    assert_eq!(completion.length, 18);
    assert_eq!(completion.data, descriptor);
    // One data descriptor plus setup and status stages
    assert_eq!(
        completion.backend,
        Some(BackendResult::Ring { head: 0, tail: 2 })
    );

    assert_eq!(host.transfer_state(transfer), None);
    assert_eq!(host.transfers_available(), 4);
}

#[test]
fn test_setup_without_data_stage() {
    let (host, hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::control(8)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let log = CompletionLog::new();

    host.send_setup(
        pipe,
        transfer,
        SetupPacket::set_configuration(1),
        TransferRequest::new(Vec::new(), log.callback()),
    )
    .unwrap();

    hardware.complete(transfer, 0).unwrap();
    host.task_once();

    let completions = log.completions();
    assert_eq!(completions[0].status, TransferStatus::Success);
    assert_eq!(completions[0].length, 0);
    assert!(matches!(
        completions[0].backend,
        Some(BackendResult::Register { result: 0, .. })
    ));
}

#[test]
fn test_setup_argument_checks() {
    let (host, _hardware, device) = attached("ehci");
    let control = host.open_pipe(device, PipeInit::control(64)).unwrap();
    let bulk = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let setup = SetupPacket::get_descriptor(0x02, 0, 64);

    assert!(matches!(
        host.send_setup(bulk, transfer, setup, TransferRequest::new(vec![0; 64], ignore)),
        Err(HostError::InvalidParameter(_))
    ));
    assert!(matches!(
        host.send_setup(control, transfer, setup, TransferRequest::new(vec![0; 9], ignore)),
        Err(HostError::InvalidParameter(_))
    ));
    assert!(matches!(
        host.recv(control, transfer, TransferRequest::new(vec![0; 64], ignore)),
        Err(HostError::InvalidParameter(_))
    ));
    assert!(matches!(
        host.send(bulk, transfer, TransferRequest::new(vec![0; 64], ignore)),
        Err(HostError::InvalidParameter(_))
    ));

    // Nothing was bound, so the transfer can still be freed
    assert_eq!(host.transfer_state(transfer), Some(TransferState::Idle));
    host.free_transfer(transfer).unwrap();
}

// ============================================================================
// Pipe parameters
// ============================================================================

#[test]
fn test_interrupt_pipe_rejects_nak_count() {
    let (host, _hardware, device) = attached("ehci");
    let before = host.pipes_available();

    let result = host.open_pipe(device, PipeInit::interrupt(0x83, 64, 4).with_nak_count(1));
    assert_eq!(result, Err(HostError::InvalidParameter("nak count")));
    assert_eq!(host.pipes_available(), before);
}

#[test]
fn test_pipe_parameter_checks() {
    let (host, _hardware, device) = attached("ehci");

    assert_eq!(
        host.open_pipe(device, PipeInit::bulk(0x81, 1024)),
        Err(HostError::InvalidParameter("max packet size"))
    );
    assert_eq!(
        host.open_pipe(device, PipeInit::interrupt(0x83, 64, 0)),
        Err(HostError::InvalidParameter("interval"))
    );
    assert_eq!(
        host.open_pipe(device, PipeInit::isochronous(0x84, 1024, 1).with_transactions(4)),
        Err(HostError::InvalidParameter("transactions per microframe"))
    );

    let pipe = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();
    let info = host.pipe_info(pipe).unwrap();
    assert_eq!(info.device_address, 1);
    assert_eq!(info.init.endpoint_number(), 1);
    assert_eq!(host.data_toggle(pipe).unwrap(), 0);
}

#[test]
fn test_pipe_pool_exhaustion() {
    let (host, _hardware, device) = attached("ehci");
    let pipes: Vec<_> = (0..8)
        .map(|_| host.open_pipe(device, PipeInit::control(64)).unwrap())
        .collect();

    assert_eq!(
        host.open_pipe(device, PipeInit::control(64)),
        Err(HostError::Error(Failure::NoIdlePipe))
    );

    host.close_pipe(pipes[0]).unwrap();
    assert!(host.open_pipe(device, PipeInit::control(64)).is_ok());
}

#[test]
fn test_periodic_bandwidth_reservation() {
    let (host, _hardware, device) = attached("ehci");
    let first = host
        .open_pipe(device, PipeInit::isochronous(0x84, 1024, 1).with_transactions(3))
        .unwrap();

    assert_eq!(
        host.open_pipe(device, PipeInit::isochronous(0x85, 1024, 1).with_transactions(3)),
        Err(HostError::Error(Failure::InsufficientBandwidth))
    );

    host.close_pipe(first).unwrap();
    assert!(host
        .open_pipe(device, PipeInit::isochronous(0x85, 1024, 1).with_transactions(3))
        .is_ok());
}

// ============================================================================
// Transfer pool
// ============================================================================

#[test]
fn test_transfer_pool_exhaustion() {
    let (host, _hardware, _device) = attached("ehci");
    let transfers: Vec<_> = (0..4).map(|_| host.allocate_transfer().unwrap()).collect();

    assert_eq!(host.allocate_transfer(), Err(HostError::AllocFail));

    host.free_transfer(transfers[2]).unwrap();
    let again = host.allocate_transfer().unwrap();
    assert_ne!(again, transfers[2]);
    assert_eq!(host.free_transfer(transfers[2]), Err(HostError::InvalidHandle));
}

#[test]
fn test_free_bound_transfer_is_rejected() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    host.send(pipe, transfer, TransferRequest::new(vec![0; 32], ignore))
        .unwrap();

    assert_eq!(host.free_transfer(transfer), Err(HostError::InvalidHandle));

    hardware.complete(transfer, 32).unwrap();
    host.task_once();

    // Back in the pool on its own; the handle is now stale
    assert_eq!(host.free_transfer(transfer), Err(HostError::InvalidHandle));
    assert_eq!(host.transfers_available(), 4);
}

#[test]
fn test_stale_completion_is_ignored() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let log = CompletionLog::new();
    host.send(pipe, transfer, TransferRequest::new(vec![0; 8], log.callback()))
        .unwrap();

    hardware.complete(transfer, 8).unwrap();
    hardware.complete(transfer, 8).unwrap();
    assert_eq!(host.task_once(), 2);
    assert_eq!(log.count(), 1);
}

// ============================================================================
// Queueing
// ============================================================================

#[test]
fn test_register_controller_runs_one_transfer_per_pipe() {
    let (host, hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let log = CompletionLog::new();

    let first = host.allocate_transfer().unwrap();
    let second = host.allocate_transfer().unwrap();
    host.send(pipe, first, TransferRequest::new(vec![1; 64], log.callback()))
        .unwrap();
    host.send(pipe, second, TransferRequest::new(vec![2; 64], log.callback()))
        .unwrap();

    assert_eq!(host.transfer_state(first), Some(TransferState::InFlight));
    assert_eq!(host.transfer_state(second), Some(TransferState::Queued));

    hardware.complete(first, 64).unwrap();
    host.task_once();
    assert_eq!(host.transfer_state(second), Some(TransferState::InFlight));

    hardware.complete(second, 64).unwrap();
    host.task_once();

    let order: Vec<_> = log.completions().iter().map(|c| c.transfer).collect();
    assert_eq!(order, vec![first, second]);
    assert_eq!(log.statuses(), vec![TransferStatus::Success; 2]);
}

#[test]
fn test_register_frame_number_in_result() {
    let (host, hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let log = CompletionLog::new();
    host.send(pipe, transfer, TransferRequest::new(vec![0; 16], log.callback()))
        .unwrap();

    host.update_hw_tick(0x1805);
    hardware.stall(transfer).unwrap();
    host.task_once();

    let completion = &log.completions()[0];
    assert_eq!(completion.status, TransferStatus::Stalled);
    assert_eq!(
        completion.backend,
        Some(BackendResult::Register {
            result: -10,
            frame: 0x005
        })
    );
}

#[test]
fn test_lack_of_swap_buffer() {
    let (host, _hardware, device) = attached("khci");
    let bulk = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let interrupt = host.open_pipe(device, PipeInit::interrupt(0x81, 8, 10)).unwrap();

    let first = host.allocate_transfer().unwrap();
    host.send(bulk, first, TransferRequest::new(vec![0; 64], ignore))
        .unwrap();

    let second = host.allocate_transfer().unwrap();
    assert_eq!(
        host.recv(interrupt, second, TransferRequest::new(vec![0; 8], ignore)),
        Err(HostError::LackSwapBuffer)
    );
    assert_eq!(host.transfer_state(second), Some(TransferState::Idle));
    host.free_transfer(second).unwrap();
}

#[test]
fn test_descriptor_exhaustion() {
    let mut config = test_config("ehci");
    config.ring.descriptors = 2;
    config.ring.bytes_per_descriptor = 64;
    let (host, _hardware, device) = attached_with(config);
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();

    assert_eq!(
        host.send(pipe, transfer, TransferRequest::new(vec![0; 256], ignore)),
        Err(HostError::Error(Failure::NoFreeDescriptor))
    );
    assert_eq!(host.transfer_state(transfer), Some(TransferState::Idle));

    host.send(pipe, transfer, TransferRequest::new(vec![0; 128], ignore))
        .unwrap();
    assert_eq!(host.transfer_state(transfer), Some(TransferState::InFlight));
}

#[test]
fn test_with_length_limits_transfer() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    let log = CompletionLog::new();
    host.recv(
        pipe,
        transfer,
        TransferRequest::new(vec![0; 64], log.callback()).with_length(4),
    )
    .unwrap();

    hardware.complete_with_data(transfer, &[9; 10]).unwrap();
    host.task_once();

    let completion = &log.completions()[0];
    assert_eq!(completion.length, 4);
    assert_eq!(completion.data, vec![9; 4]);
}

// ============================================================================
// Cancellation and close
// ============================================================================

#[test]
fn test_cancel_all_completes_each_transfer_once() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new();

    let transfers: Vec<_> = (0..3)
        .map(|i| {
            let t = host.allocate_transfer().unwrap();
            host.send(pipe, t, TransferRequest::new(vec![i; 32], log.callback()))
                .unwrap();
            t
        })
        .collect();

    host.cancel(pipe, None).unwrap();
    assert_eq!(log.count(), 0);
    host.task_once();

    assert_eq!(log.statuses(), vec![TransferStatus::Canceled; 3]);
    let order: Vec<_> = log.completions().iter().map(|c| c.transfer).collect();
    assert_eq!(order, transfers);

    // A completion racing the cancel finds the transfer gone
    hardware.complete(transfers[0], 32).unwrap();
    host.task_once();
    assert_eq!(log.count(), 3);

    assert_eq!(host.pipe_state(pipe), Some(PipeState::Open));
    assert_eq!(host.transfers_available(), 4);
}

#[test]
fn test_cancel_in_flight_and_queued_on_register_controller() {
    let (host, _hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let log = CompletionLog::new();

    let transfers: Vec<_> = (0..3)
        .map(|_| {
            let t = host.allocate_transfer().unwrap();
            host.send(pipe, t, TransferRequest::new(vec![0; 64], log.callback()))
                .unwrap();
            t
        })
        .collect();

    host.cancel(pipe, None).unwrap();
    host.task_once();

    let completions = log.completions();
    assert_eq!(completions.len(), 3);
    assert!(completions.iter().all(|c| c.status == TransferStatus::Canceled));
    assert_eq!(completions[0].transfer, transfers[0]);
    assert!(matches!(
        completions[0].backend,
        Some(BackendResult::Register { result: -14, .. })
    ));
    // Queued transfers never reached the controller
    assert_eq!(completions[1].backend, None);
    assert_eq!(completions[2].length, 0);
}

#[test]
fn test_cancel_single_transfer() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new();
    let keep = host.allocate_transfer().unwrap();
    let dropped = host.allocate_transfer().unwrap();
    host.send(pipe, keep, TransferRequest::new(vec![0; 8], log.callback()))
        .unwrap();
    host.send(pipe, dropped, TransferRequest::new(vec![0; 8], log.callback()))
        .unwrap();

    host.cancel(pipe, Some(dropped)).unwrap();
    // Twice is harmless
    host.cancel(pipe, Some(dropped)).unwrap();
    hardware.complete(keep, 8).unwrap();
    host.task_once();

    let outcome: Vec<_> = log
        .completions()
        .iter()
        .map(|c| (c.transfer, c.status))
        .collect();
    assert_eq!(
        outcome,
        vec![
            (dropped, TransferStatus::Canceled),
            (keep, TransferStatus::Success)
        ]
    );
}

#[test]
fn test_cancel_unbound_transfer_is_noop() {
    let (host, _hardware, device) = attached("ehci");
    let first = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let second = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();
    let transfer = host.allocate_transfer().unwrap();
    host.send(first, transfer, TransferRequest::new(vec![0; 8], ignore))
        .unwrap();

    host.cancel(second, Some(transfer)).unwrap();
    assert_eq!(host.pending_events(), 0);
    assert_eq!(host.transfer_state(transfer), Some(TransferState::InFlight));
}

#[test]
fn test_close_with_outstanding_transfers() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new();
    let transfer = host.allocate_transfer().unwrap();
    host.send(pipe, transfer, TransferRequest::new(vec![0; 8], log.callback()))
        .unwrap();

    host.close_pipe(pipe).unwrap();
    assert_eq!(host.pipe_state(pipe), Some(PipeState::Closing));
    assert_eq!(host.close_pipe(pipe), Err(HostError::InvalidHandle));

    let late = host.allocate_transfer().unwrap();
    assert_eq!(
        host.send(pipe, late, TransferRequest::new(vec![0; 8], ignore)),
        Err(HostError::InvalidHandle)
    );

    host.task_once();
    assert_eq!(log.statuses(), vec![TransferStatus::Canceled]);
    assert_eq!(host.pipe_state(pipe), None);
    assert_eq!(host.pipes_available(), 8);
    assert_eq!(host.cancel(pipe, None), Err(HostError::InvalidHandle));

    // Completion after the pipe is gone changes nothing
    hardware.complete(transfer, 8).unwrap();
    host.task_once();
    assert_eq!(log.count(), 1);
}

#[test]
fn test_close_idle_pipe_is_immediate() {
    let (host, _hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::control(8)).unwrap();

    host.close_pipe(pipe).unwrap();
    assert_eq!(host.pipe_state(pipe), None);
    assert_eq!(host.close_pipe(pipe), Err(HostError::InvalidHandle));
}

// ============================================================================
// NAK handling and data toggle
// ============================================================================

#[test]
fn test_nak_budget_from_pipe() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host
        .open_pipe(device, PipeInit::bulk(0x81, 512).with_nak_count(2))
        .unwrap();
    let log = CompletionLog::new();
    let transfer = host.allocate_transfer().unwrap();
    host.recv(pipe, transfer, TransferRequest::new(vec![0; 64], log.callback()))
        .unwrap();

    hardware.nak(transfer).unwrap();
    hardware.nak(transfer).unwrap();
    host.task_once();
    assert_eq!(log.count(), 0);
    assert_eq!(host.transfer_state(transfer), Some(TransferState::InFlight));

    hardware.nak(transfer).unwrap();
    host.task_once();
    assert_eq!(log.statuses(), vec![TransferStatus::Failed]);
}

#[test]
fn test_default_nak_budget() {
    let mut config = test_config("khci");
    config.limits.nak_retry_budget = 1;
    let (host, hardware, device) = attached_with(config);
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let log = CompletionLog::new();
    let transfer = host.allocate_transfer().unwrap();
    host.send(pipe, transfer, TransferRequest::new(vec![0; 64], log.callback()))
        .unwrap();

    hardware.nak(transfer).unwrap();
    hardware.nak(transfer).unwrap();
    host.task_once();
    assert_eq!(log.statuses(), vec![TransferStatus::Failed]);
}

#[test]
fn test_interrupt_pipe_polls_through_naks() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host
        .open_pipe(device, PipeInit::interrupt(0x83, 64, 4))
        .unwrap();
    let log = CompletionLog::new();
    let transfer = host.allocate_transfer().unwrap();
    host.recv(pipe, transfer, TransferRequest::new(vec![0; 64], log.callback()))
        .unwrap();

    for _ in 0..10 {
        hardware.nak(transfer).unwrap();
    }
    hardware.complete_with_data(transfer, &[0x01, 0x02]).unwrap();
    host.task_once();

    let completions = log.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, TransferStatus::Success);
    assert_eq!(completions[0].data, vec![0x01, 0x02]);
}

#[test]
fn test_data_toggle_tracks_packets() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();

    let run = |length: usize, stall: bool| {
        let transfer = host.allocate_transfer().unwrap();
        host.send(pipe, transfer, TransferRequest::new(vec![0; length], ignore))
            .unwrap();
        if stall {
            hardware.stall(transfer).unwrap();
        } else {
            hardware.complete(transfer, length).unwrap();
        }
        host.task_once();
        host.data_toggle(pipe).unwrap()
    };

    // Two packets leave the toggle where it was
    assert_eq!(run(1024, false), 0);
    assert_eq!(run(512, false), 1);
    // Zero-length packet still toggles
    assert_eq!(run(0, false), 0);
    assert_eq!(run(100, false), 1);
    assert_eq!(run(64, true), 0);
}

#[test]
fn test_failed_transfer_keeps_toggle() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new();

    let first = host.allocate_transfer().unwrap();
    host.send(pipe, first, TransferRequest::new(vec![0; 10], log.callback()))
        .unwrap();
    hardware.complete(first, 10).unwrap();
    host.task_once();

    let second = host.allocate_transfer().unwrap();
    host.send(pipe, second, TransferRequest::new(vec![0; 10], log.callback()))
        .unwrap();
    hardware.fail(second).unwrap();
    host.task_once();

    assert_eq!(
        log.statuses(),
        vec![TransferStatus::Success, TransferStatus::Failed]
    );
    assert_eq!(host.data_toggle(pipe).unwrap(), 1);
}

// ============================================================================
// Callbacks
// ============================================================================

#[test]
fn test_completion_callback_may_resubmit() {
    let (host, hardware, device) = attached("khci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 64)).unwrap();
    let log = CompletionLog::new();
    let first = host.allocate_transfer().unwrap();
    let second = host.allocate_transfer().unwrap();

    let resubmit = {
        let host = host.clone();
        let next = log.callback();
        move |completion: Completion| {
            host.send(pipe, second, TransferRequest::new(completion.data, next))
                .unwrap();
        }
    };
    host.send(pipe, first, TransferRequest::new(vec![7; 32], resubmit))
        .unwrap();

    hardware.complete(first, 32).unwrap();
    host.task_once();
    assert_eq!(host.transfer_state(second), Some(TransferState::InFlight));

    hardware.complete(second, 32).unwrap();
    host.task_once();
    assert_eq!(log.statuses(), vec![TransferStatus::Success]);
}

#[test]
fn test_panicking_callback_does_not_stop_the_loop() {
    let (host, hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new();

    let bad = host.allocate_transfer().unwrap();
    host.send(
        pipe,
        bad,
        TransferRequest::new(vec![0; 8], |_: Completion| panic!("driver bug")),
    )
    .unwrap();
    let good = host.allocate_transfer().unwrap();
    host.send(pipe, good, TransferRequest::new(vec![0; 8], log.callback()))
        .unwrap();

    hardware.complete(bad, 8).unwrap();
    hardware.complete(good, 8).unwrap();
    host.task_once();

    assert_eq!(log.statuses(), vec![TransferStatus::Success]);
    assert_eq!(host.transfers_available(), 4);
}

// ============================================================================
// Detach with transfers in flight
// ============================================================================

#[test]
fn test_detach_cancels_before_reporting() {
    let journal = Journal::new();
    let (host, callback, hardware) = test_host_with(
        test_config("ehci"),
        RecordingHostCallback::new().with_journal(journal.clone()),
    );
    hardware.attach(bulk_device(1)).unwrap();
    host.task_once();
    let device = callback.last_attached().unwrap();

    let input = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();
    let output = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
    let log = CompletionLog::new().with_journal(journal.clone());
    let read = host.allocate_transfer().unwrap();
    let write = host.allocate_transfer().unwrap();
    host.recv(input, read, TransferRequest::new(vec![0; 512], log.callback()))
        .unwrap();
    host.send(output, write, TransferRequest::new(vec![0; 512], log.callback()))
        .unwrap();

    hardware.detach(1).unwrap();
    host.task_once();

    assert_eq!(
        journal.entries(),
        vec![
            JournalEntry::Host {
                address: 1,
                event: HostEvent::Attached
            },
            JournalEntry::Transfer {
                transfer: read,
                status: TransferStatus::Canceled
            },
            JournalEntry::Transfer {
                transfer: write,
                status: TransferStatus::Canceled
            },
            JournalEntry::Host {
                address: 1,
                event: HostEvent::Detached
            },
        ]
    );
    assert_eq!(host.pipe_state(input), None);
    assert_eq!(host.pipe_state(output), None);
    assert_eq!(host.transfers_available(), 4);
    assert_eq!(host.pipes_available(), 8);
}

// ============================================================================
// Async submission
// ============================================================================

#[tokio::test]
async fn test_send_async_resolves_on_completion() {
    let (host, _callback, hardware) = test_host("ehci");
    hardware.attach(bulk_device(1)).unwrap();
    host.task_once();
    let device = host.device_by_address(1).unwrap();
    let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();

    let (transfer, completion) = host.send_async(pipe, vec![0x55; 16]).unwrap();
    hardware.complete(transfer, 16).unwrap();
    host.task_once();

    let completion = completion.await.unwrap();
    assert_eq!(completion.status, TransferStatus::Success);
    assert_eq!(completion.length, 16);
}

#[tokio::test]
async fn test_recv_async_with_task_loop() {
    let (host, _callback, hardware) = test_host("ehci");
    let task = tokio::spawn({
        let host = host.clone();
        async move { host.run_task_async().await }
    });

    hardware.attach(bulk_device(1)).unwrap();
    let device = loop {
        if let Some(device) = host.device_by_address(1) {
            break device;
        }
        tokio::task::yield_now().await;
    };
    let pipe = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();

    let (transfer, completion) = host.recv_async(pipe, 4).unwrap();
    hardware.complete_with_data(transfer, b"ping").unwrap();
    let completion = completion.await.unwrap();
    assert_eq!(completion.received(), b"ping");

    host.shutdown().unwrap();
    task.await.unwrap();
}

#[test]
fn test_async_submit_failure_returns_transfer() {
    let (host, _hardware, device) = attached("ehci");
    let pipe = host.open_pipe(device, PipeInit::bulk(0x81, 512)).unwrap();

    assert!(matches!(
        host.send_async(pipe, vec![0; 8]),
        Err(HostError::InvalidParameter(_))
    ));
    assert_eq!(host.transfers_available(), 4);
}
