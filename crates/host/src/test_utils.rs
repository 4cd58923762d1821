//! Test utilities for the host core
//!
//! A recording host callback, a recording completion sink, and
//! [`ScriptedHardware`], which plays the controller hardware by raising
//! events through the host's interrupt entry point.
//!
//! # Example
//!
//! ```
//! use host::test_utils::{bulk_device, test_host};
//! use protocol::HostEvent;
//!
//! let (host, callback, hardware) = test_host("ehci");
//! hardware.attach(bulk_device(1)).unwrap();
//! host.task_once();
//! assert_eq!(callback.events(), vec![HostEvent::Attached]);
//! ```

use crate::backend::{HardwareEvent, HardwareStatus, Interrupt, PowerOutcome};
use crate::config::{HostConfig, PoolSettings};
use crate::device::{Configuration, DeviceDescription, DeviceInfo, Endpoint, InterfaceDescription, Topology};
use crate::dispatcher::{CallbackStatus, HostCallback};
use crate::handle::{DeviceHandle, PipeHandle, TransferHandle};
use crate::host::Host;
use crate::transfer::{BackendResult, Completion};
use bytes::Bytes;
use protocol::{DeviceSpeed, EndpointType, HostEvent, TransferStatus, UsbStatus};
use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered record of host events and completions, shared between sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Host { address: u8, event: HostEvent },
    Transfer { transfer: TransferHandle, status: TransferStatus },
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.entries).clone()
    }

    fn push(&self, entry: JournalEntry) {
        lock(&self.entries).push(entry);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host event as seen by [`RecordingHostCallback`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub device: DeviceInfo,
    pub event: HostEvent,
    /// Interfaces in the configuration handed to the callback
    pub interfaces: Option<usize>,
}

/// Host callback that records every event and answers with a fixed status
#[derive(Debug, Clone)]
pub struct RecordingHostCallback {
    records: Arc<Mutex<Vec<RecordedEvent>>>,
    status: CallbackStatus,
    journal: Option<Journal>,
}

impl Default for RecordingHostCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHostCallback {
    /// Accept every device
    pub fn new() -> Self {
        Self::answering(CallbackStatus::Success)
    }

    pub fn answering(status: CallbackStatus) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            status,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn records(&self) -> Vec<RecordedEvent> {
        lock(&self.records).clone()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.records).iter().map(|r| r.event).collect()
    }

    pub fn count(&self) -> usize {
        lock(&self.records).len()
    }

    /// Handle of the most recently attached device or hub
    pub fn last_attached(&self) -> Option<DeviceHandle> {
        lock(&self.records)
            .iter()
            .rev()
            .find(|r| matches!(r.event, HostEvent::Attached | HostEvent::HubAttached))
            .and_then(|r| r.device.handle)
    }
}

impl HostCallback for RecordingHostCallback {
    fn on_event(
        &self,
        device: &DeviceInfo,
        configuration: Option<&Configuration>,
        event: HostEvent,
    ) -> CallbackStatus {
        lock(&self.records).push(RecordedEvent {
            device: device.clone(),
            event,
            interfaces: configuration.map(|c| c.interfaces.len()),
        });
        if let Some(journal) = &self.journal {
            journal.push(JournalEntry::Host {
                address: device.address,
                event,
            });
        }
        self.status
    }
}

/// Completion as seen by [`CompletionLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub transfer: TransferHandle,
    pub pipe: PipeHandle,
    pub status: TransferStatus,
    pub length: usize,
    pub data: Vec<u8>,
    pub backend: Option<BackendResult>,
}

/// Sink for transfer completions
#[derive(Debug, Clone, Default)]
pub struct CompletionLog {
    records: Arc<Mutex<Vec<CompletionRecord>>>,
    journal: Option<Journal>,
}

impl CompletionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Completion callback that appends to this log
    pub fn callback(&self) -> impl FnOnce(Completion) + Send + 'static {
        let records = Arc::clone(&self.records);
        let journal = self.journal.clone();
        move |completion: Completion| {
            if let Some(journal) = journal {
                journal.push(JournalEntry::Transfer {
                    transfer: completion.transfer,
                    status: completion.status,
                });
            }
            lock(&records).push(CompletionRecord {
                transfer: completion.transfer,
                pipe: completion.pipe,
                status: completion.status,
                length: completion.length,
                data: completion.received().to_vec(),
                backend: completion.backend,
            });
        }
    }

    pub fn completions(&self) -> Vec<CompletionRecord> {
        lock(&self.records).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn statuses(&self) -> Vec<TransferStatus> {
        lock(&self.records).iter().map(|r| r.status).collect()
    }
}

/// Stand-in for controller hardware
///
/// Every method raises one event through the interrupt entry point, exactly
/// as an interrupt service routine would.
#[derive(Debug, Clone)]
pub struct ScriptedHardware {
    interrupt: Interrupt,
}

impl ScriptedHardware {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    pub fn attach(&self, description: DeviceDescription) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::Attached(description))
    }

    pub fn detach(&self, address: u8) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::Detached { address })
    }

    pub fn enum_fail(&self, address: u8, speed: DeviceSpeed, reason: UsbStatus) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::EnumerationFailed {
            address,
            speed,
            topology: Topology::root(1),
            reason,
        })
    }

    /// OUT transfer (or zero-length IN) finished with `length` bytes
    pub fn complete(&self, transfer: TransferHandle, length: usize) -> common::Result<()> {
        self.done(transfer, HardwareStatus::Ack, length, None)
    }

    /// IN transfer finished with `data`
    pub fn complete_with_data(&self, transfer: TransferHandle, data: &[u8]) -> common::Result<()> {
        self.done(
            transfer,
            HardwareStatus::Ack,
            data.len(),
            Some(Bytes::copy_from_slice(data)),
        )
    }

    pub fn stall(&self, transfer: TransferHandle) -> common::Result<()> {
        self.done(transfer, HardwareStatus::Stall, 0, None)
    }

    pub fn nak(&self, transfer: TransferHandle) -> common::Result<()> {
        self.done(transfer, HardwareStatus::Nak, 0, None)
    }

    pub fn fail(&self, transfer: TransferHandle) -> common::Result<()> {
        self.done(transfer, HardwareStatus::Error, 0, None)
    }

    pub fn power(&self, address: u8, outcome: PowerOutcome) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::Power { address, outcome })
    }

    pub fn shutdown(&self) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::Shutdown)
    }

    fn done(
        &self,
        transfer: TransferHandle,
        status: HardwareStatus,
        length: usize,
        payload: Option<Bytes>,
    ) -> common::Result<()> {
        self.interrupt.raise(HardwareEvent::TransferDone {
            transfer,
            status,
            length,
            payload,
        })
    }
}

/// Minimal configuration descriptor header for `interfaces` interfaces
fn config_descriptor(interfaces: u8) -> Bytes {
    Bytes::from(vec![0x09, 0x02, 0x20, 0x00, interfaces, 0x01, 0x00, 0x80, 0x32])
}

/// High-speed vendor device: bulk IN 0x81, bulk OUT 0x02, interrupt IN 0x83,
/// plus an empty alternate setting 1
pub fn bulk_device(address: u8) -> DeviceDescription {
    DeviceDescription::new(address, DeviceSpeed::High)
        .with_ids(0x1234, 0x5678)
        .with_interface(
            InterfaceDescription::new(0, 0, 0xFF)
                .with_endpoint(Endpoint::new(0x81, EndpointType::Bulk, 512, 0))
                .with_endpoint(Endpoint::new(0x02, EndpointType::Bulk, 512, 0))
                .with_endpoint(Endpoint::new(0x83, EndpointType::Interrupt, 64, 4)),
        )
        .with_interface(InterfaceDescription::new(0, 1, 0xFF))
        .with_descriptor(config_descriptor(1))
}

/// Full-speed device, for register-model (khci) hosts
pub fn full_speed_device(address: u8) -> DeviceDescription {
    DeviceDescription::new(address, DeviceSpeed::Full)
        .with_ids(0x046d, 0xc52b)
        .with_topology(Topology::root(1))
        .with_interface(
            InterfaceDescription::new(0, 0, 0x03)
                .with_endpoint(Endpoint::new(0x81, EndpointType::Interrupt, 8, 10))
                .with_endpoint(Endpoint::new(0x02, EndpointType::Bulk, 64, 0)),
        )
        .with_descriptor(config_descriptor(1))
}

/// High-speed hub on root port 1
pub fn hub(address: u8) -> DeviceDescription {
    DeviceDescription::new(address, DeviceSpeed::High)
        .with_ids(0x0424, 0x2514)
        .as_hub(8)
        .with_interface(
            InterfaceDescription::new(0, 0, 0x09)
                .with_endpoint(Endpoint::new(0x81, EndpointType::Interrupt, 1, 12)),
        )
        .with_descriptor(config_descriptor(1))
}

/// Small pools so exhaustion paths are cheap to reach
pub fn test_config(controller: &str) -> HostConfig {
    let mut config = HostConfig::default();
    config.host.controller = controller.to_string();
    config.pools = PoolSettings {
        devices: 4,
        pipes: 8,
        transfers: 4,
        event_queue_depth: 16,
    };
    config
}

/// Host on `controller` with a recording callback and scripted hardware
///
/// Panics if the controller name is unknown.
pub fn test_host(controller: &str) -> (Host, RecordingHostCallback, ScriptedHardware) {
    test_host_with(test_config(controller), RecordingHostCallback::new())
}

/// Host from `config` with the given recording callback
pub fn test_host_with(
    config: HostConfig,
    callback: RecordingHostCallback,
) -> (Host, RecordingHostCallback, ScriptedHardware) {
    let host = match Host::new(&config, callback.clone()) {
        Ok(host) => host,
        Err(e) => panic!("test host on {} failed: {}", config.host.controller, e),
    };
    let hardware = ScriptedHardware::new(host.interrupt());
    (host, callback, hardware)
}
