//! Event dispatch
//!
//! The task loop drains hardware events raised from interrupt context and
//! turns them into host callbacks (attach, detach, enumeration failure,
//! power) and transfer completions. State changes happen under the host
//! lock; callbacks run after it is released, since they may call straight
//! back into open/close/send/cancel.

use crate::backend::{HardwareEvent, HardwareStatus};
use crate::device::{Configuration, Device, DeviceDescription, DeviceInfo, DeviceState, Topology};
use crate::handle::{DeviceHandle, TransferHandle};
use crate::host::{Host, TaskLoopGuard};
use crate::pipe::PipeState;
use crate::queue::Finished;
use protocol::{DeviceSpeed, HostEvent, UsbStatus};
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Host callback's verdict on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Device accepted
    Success,
    /// No class driver for this device
    NotSupported,
    Error,
}

/// Host-level event sink registered at startup
pub trait HostCallback: Send + Sync {
    fn on_event(
        &self,
        device: &DeviceInfo,
        configuration: Option<&Configuration>,
        event: HostEvent,
    ) -> CallbackStatus;
}

impl<F> HostCallback for F
where
    F: Fn(&DeviceInfo, Option<&Configuration>, HostEvent) -> CallbackStatus + Send + Sync,
{
    fn on_event(
        &self,
        device: &DeviceInfo,
        configuration: Option<&Configuration>,
        event: HostEvent,
    ) -> CallbackStatus {
        self(device, configuration, event)
    }
}

impl Host {
    /// Drain every pending hardware event (bare-metal polling)
    ///
    /// Returns the number of events handled.
    pub fn task_once(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.inner.events.try_recv() {
            handled += 1;
            if self.dispatch(event).is_break() {
                break;
            }
        }
        handled
    }

    /// Block the calling thread handling events until shutdown
    pub fn run_task(&self) {
        let _active = TaskLoopGuard::enter(&self.inner.task_loops);
        info!("USB host task loop started");
        loop {
            match self.inner.events.recv_blocking() {
                Ok(event) => {
                    if self.dispatch(event).is_break() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Event queue closed: {}", e);
                    break;
                }
            }
        }
        info!("USB host task loop stopped");
    }

    /// Handle events from an async runtime until shutdown
    pub async fn run_task_async(&self) {
        let _active = TaskLoopGuard::enter(&self.inner.task_loops);
        while let Ok(event) = self.inner.events.recv().await {
            if self.dispatch(event).is_break() {
                break;
            }
        }
    }

    pub(crate) fn dispatch(&self, event: HardwareEvent) -> ControlFlow<()> {
        match event {
            HardwareEvent::Attached(description) => self.on_attached(description),
            HardwareEvent::Detached { address } => self.on_detached(address),
            HardwareEvent::EnumerationFailed {
                address,
                speed,
                topology,
                reason,
            } => {
                warn!("Enumeration of device {} failed: {:?}", address, reason);
                let info = unenumerated(address, speed, topology);
                self.notify(&info, None, HostEvent::EnumerationFailed(reason));
            }
            HardwareEvent::TransferDone {
                transfer,
                status,
                length,
                payload,
            } => {
                let finished = self.lock().retire(transfer, status, length, payload);
                self.deliver(finished.into_iter().collect());
            }
            HardwareEvent::Power { address, outcome } => self.on_power(address, outcome),
            HardwareEvent::Shutdown => {
                self.teardown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_attached(&self, description: DeviceDescription) {
        let attached = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.running {
                return;
            }

            let duplicate = state
                .devices
                .iter()
                .any(|(_, d)| d.info.address == description.address);
            let configuration = Configuration::build(&description.configuration, &state.limits);

            match configuration {
                _ if duplicate => {
                    warn!("Address {} is already in use", description.address);
                    Err(UsbStatus::Error)
                }
                Err(e) => {
                    warn!("Configuration of device {} rejected: {}", description.address, e);
                    Err(UsbStatus::Error)
                }
                Ok(configuration) => {
                    let info =
                        DeviceInfo::from_description(None, &description, state.charger_type);
                    match state.devices.checkout(Device::new(info, configuration)) {
                        Ok(handle) => state
                            .devices
                            .get_mut(handle)
                            .map(|record| {
                                record.info.handle = Some(handle);
                                (handle, record.info.clone(), Arc::clone(&record.configuration))
                            })
                            .ok_or(UsbStatus::Error),
                        Err(_) => {
                            warn!("Device table full, dropping device {}", description.address);
                            Err(UsbStatus::AllocFail)
                        }
                    }
                }
            }
        };

        let (handle, info, configuration) = match attached {
            Ok(attached) => attached,
            Err(reason) => {
                let info = DeviceInfo::from_description(None, &description, None);
                self.notify(&info, None, HostEvent::EnumerationFailed(reason));
                return;
            }
        };

        info!(
            "Device attached: {} address {} {:04x}:{:04x} ({:?})",
            handle, info.address, info.vendor_id, info.product_id, info.speed
        );
        let event = if info.is_hub {
            HostEvent::HubAttached
        } else {
            HostEvent::Attached
        };

        let status = self.notify(&info, Some(&configuration), event);
        let claimed = status == CallbackStatus::Success;
        if !claimed {
            info!("Device {} not claimed ({:?})", info.address, status);
        }
        // The record stays hidden until the attach callback has answered
        if let Some(record) = self.lock().devices.get_mut(handle) {
            if record.state == DeviceState::Enumerating {
                record.state = if claimed {
                    DeviceState::Attached
                } else {
                    DeviceState::Rejected
                };
            }
        }
    }

    fn on_detached(&self, address: u8) {
        let handle = self
            .lock()
            .devices
            .iter()
            .find(|(_, d)| d.info.address == address && d.is_usable())
            .map(|(h, _)| h);

        match handle {
            Some(handle) => self.detach_device(handle),
            None => debug!("Detach for unknown address {}", address),
        }
    }

    /// Tear down a device: children first, then its transfers and pipes,
    /// then the detach callback, then the record itself
    pub(crate) fn detach_device(&self, handle: DeviceHandle) {
        let children: Vec<DeviceHandle> = {
            let mut state = self.lock();
            let Some(record) = state.devices.get_mut(handle) else {
                return;
            };
            if record.state == DeviceState::Detaching {
                return;
            }
            record.state = DeviceState::Detaching;
            let (address, is_hub) = (record.info.address, record.info.is_hub);

            if is_hub {
                state
                    .devices
                    .iter()
                    .filter(|(_, d)| d.info.topology.hub_number == address && d.is_usable())
                    .map(|(h, _)| h)
                    .collect()
            } else {
                Vec::new()
            }
        };

        for child in children {
            self.detach_device(child);
        }

        // Force-cancel everything bound to the device's pipes
        let (finished, pipes) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let pipes = state
                .devices
                .get(handle)
                .map(|d| d.pipes.clone())
                .unwrap_or_default();

            let mut finished = Vec::new();
            for pipe in &pipes {
                let Some(record) = state.pools.pipes.get_mut(*pipe) else {
                    continue;
                };
                record.state = PipeState::Closing;
                let bound: Vec<TransferHandle> = record.queue.iter().copied().collect();
                for transfer in bound {
                    finished.extend(state.retire(transfer, HardwareStatus::Canceled, 0, None));
                }
            }
            (finished, pipes)
        };

        if !finished.is_empty() {
            debug!("Canceled {} transfer(s) of detaching {}", finished.len(), handle);
        }
        self.deliver(finished);

        let detached = {
            let mut state = self.lock();
            for pipe in pipes {
                if state.pools.pipes.contains(pipe) {
                    state.finalize_pipe(pipe);
                }
            }
            state
                .devices
                .get(handle)
                .map(|d| (d.info.clone(), Arc::clone(&d.configuration)))
        };

        let Some((info, configuration)) = detached else {
            return;
        };
        let event = if info.is_hub {
            HostEvent::HubDetached
        } else {
            HostEvent::Detached
        };
        self.notify(&info, Some(&configuration), event);

        self.lock().devices.checkin(handle);
        info!("Device detached: {} address {}", handle, info.address);
    }

    /// Run transfer callbacks, then return the transfers to the pool and
    /// let waiting transfers move up
    pub(crate) fn deliver(&self, finished: Vec<Finished>) {
        let handles: Vec<TransferHandle> = finished.iter().map(|(_, c)| c.transfer).collect();

        for (callback, completion) in finished {
            let transfer = completion.transfer;
            let result = catch_unwind(AssertUnwindSafe(|| callback.complete(completion)));
            if let Err(e) = result {
                error!("Panic in completion callback of {}: {:?}", transfer, e);
            }
        }

        let mut state = self.lock();
        for handle in handles {
            if let Err(e) = state.pools.release_transfer(handle) {
                error!("Release of {} failed: {}", handle, e);
            }
        }
        state.finalize_closing_pipes();
        state.pump();
    }

    /// Invoke the host callback outside the lock
    pub(crate) fn notify(
        &self,
        info: &DeviceInfo,
        configuration: Option<&Configuration>,
        event: HostEvent,
    ) -> CallbackStatus {
        debug!("Host event {:?} (code 0x{:08x}) for device {}", event, event.code(), info.address);
        let callback = &self.inner.callback;
        match catch_unwind(AssertUnwindSafe(|| {
            callback.on_event(info, configuration, event)
        })) {
            Ok(status) => status,
            Err(e) => {
                error!("Panic in host callback for {:?}: {:?}", event, e);
                CallbackStatus::Error
            }
        }
    }

    #[cfg(feature = "low-power")]
    fn on_power(&self, address: u8, outcome: crate::backend::PowerOutcome) {
        let resolved = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let handle = state
                .devices
                .iter()
                .find(|(_, d)| d.info.address == address && d.is_usable())
                .map(|(h, _)| h);
            let record = handle.and_then(|h| state.devices.get_mut(h));
            record.and_then(|record| {
                let (next, event) = record.power.resolve(outcome)?;
                record.power = next;
                Some((record.info.clone(), Arc::clone(&record.configuration), event))
            })
        };

        match resolved {
            Some((info, configuration, event)) => {
                info!("Device {} power: {:?}", address, event);
                self.notify(&info, Some(&configuration), event);
            }
            None => debug!("Unexpected power outcome {:?} for device {}", outcome, address),
        }
    }

    #[cfg(not(feature = "low-power"))]
    fn on_power(&self, address: u8, outcome: crate::backend::PowerOutcome) {
        debug!("Power outcome {:?} for device {} ignored", outcome, address);
    }

    /// Detach every device and stop the controller
    pub(crate) fn teardown(&self) {
        let devices = self.lock().devices.handles();
        for device in devices {
            self.detach_device(device);
        }

        let mut state = self.lock();
        if state.running {
            state.controller.shutdown();
            state.running = false;
            self.inner.interrupt.close();
            info!("USB host stopped");
        }
    }
}

/// Device info for a device that never got a record
fn unenumerated(address: u8, speed: DeviceSpeed, topology: Topology) -> DeviceInfo {
    DeviceInfo {
        handle: None,
        address,
        speed,
        topology,
        vendor_id: 0,
        product_id: 0,
        is_hub: false,
        hub_think_time: 0,
        configuration_index: 0,
        charger_type: None,
    }
}
