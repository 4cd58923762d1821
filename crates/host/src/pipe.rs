//! Pipe management
//!
//! A pipe is an open channel to one endpoint of one attached device. Pipes
//! are drawn from the fixed pipe pool, mirror their device's topology for
//! the controller's bandwidth accounting, and are closed either explicitly
//! or when their device detaches.

use crate::device::{DeviceState, Topology};
use crate::error::{HostError, Result};
use crate::handle::{DeviceHandle, InterfaceHandle, PipeHandle, TransferHandle};
use crate::host::{Host, HostState};
use protocol::{DeviceSpeed, Direction, EndpointType};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Parameters for opening a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeInit {
    /// bEndpointAddress (bit 7 = direction)
    pub endpoint_address: u8,
    pub direction: Direction,
    pub endpoint_type: EndpointType,
    pub max_packet_size: u16,
    /// Polling interval in (micro)frames; periodic pipes only
    pub interval: u8,
    /// NAK retries before a transfer fails; 0 = host default. Must be 0 for
    /// interrupt pipes, which re-poll for as long as the device NAKs.
    pub nak_count: u32,
    /// High-bandwidth periodic endpoints: 1..=3
    pub transactions_per_microframe: u8,
}

impl PipeInit {
    /// Default control pipe (endpoint 0)
    pub fn control(max_packet_size: u16) -> Self {
        Self {
            endpoint_address: 0,
            direction: Direction::Out,
            endpoint_type: EndpointType::Control,
            max_packet_size,
            interval: 0,
            nak_count: 0,
            transactions_per_microframe: 1,
        }
    }

    pub fn bulk(endpoint_address: u8, max_packet_size: u16) -> Self {
        Self {
            endpoint_address,
            direction: Direction::from_bit7(endpoint_address),
            endpoint_type: EndpointType::Bulk,
            max_packet_size,
            interval: 0,
            nak_count: 0,
            transactions_per_microframe: 1,
        }
    }

    pub fn interrupt(endpoint_address: u8, max_packet_size: u16, interval: u8) -> Self {
        Self {
            endpoint_type: EndpointType::Interrupt,
            interval,
            ..Self::bulk(endpoint_address, max_packet_size)
        }
    }

    pub fn isochronous(endpoint_address: u8, max_packet_size: u16, interval: u8) -> Self {
        Self {
            endpoint_type: EndpointType::Isochronous,
            interval,
            ..Self::bulk(endpoint_address, max_packet_size)
        }
    }

    pub fn with_nak_count(mut self, nak_count: u32) -> Self {
        self.nak_count = nak_count;
        self
    }

    pub fn with_transactions(mut self, transactions: u8) -> Self {
        self.transactions_per_microframe = transactions;
        self
    }

    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    pub(crate) fn validate(&self, speed: DeviceSpeed) -> Result<()> {
        if self.endpoint_address & 0x70 != 0 {
            return Err(HostError::InvalidParameter("endpoint address"));
        }
        if self.endpoint_type == EndpointType::Control && self.endpoint_number() != 0 {
            // Message pipes on other endpoints exist but are not supported here
            return Err(HostError::NotSupported);
        }
        if self.endpoint_type != EndpointType::Control
            && self.direction != Direction::from_bit7(self.endpoint_address)
        {
            return Err(HostError::InvalidParameter("direction"));
        }
        let limit = speed.max_packet_limit(self.endpoint_type);
        if self.max_packet_size == 0 || self.max_packet_size > limit {
            return Err(HostError::InvalidParameter("max packet size"));
        }
        if self.endpoint_type.is_periodic() && self.interval == 0 {
            return Err(HostError::InvalidParameter("interval"));
        }
        if self.endpoint_type == EndpointType::Interrupt && self.nak_count != 0 {
            return Err(HostError::InvalidParameter("nak count"));
        }
        if !(1..=3).contains(&self.transactions_per_microframe) {
            return Err(HostError::InvalidParameter("transactions per microframe"));
        }
        Ok(())
    }
}

/// Pipe parameters plus what the controller needs from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeInfo {
    pub init: PipeInit,
    pub device_address: u8,
    pub speed: DeviceSpeed,
    pub topology: Topology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Open,
    /// Close requested; waiting for canceled transfers to drain
    Closing,
}

pub(crate) struct Pipe {
    pub(crate) device: DeviceHandle,
    pub(crate) info: PipeInfo,
    pub(crate) data_toggle: u8,
    pub(crate) state: PipeState,
    /// Bound transfers in submission order, queued and in flight
    pub(crate) queue: VecDeque<TransferHandle>,
    pub(crate) in_flight: usize,
}

impl Pipe {
    pub(crate) fn new(device: DeviceHandle, info: PipeInfo) -> Self {
        Self {
            device,
            info,
            data_toggle: 0,
            state: PipeState::Open,
            queue: VecDeque::new(),
            in_flight: 0,
        }
    }

    /// NAK retries allowed per transfer; `None` = unbounded
    pub(crate) fn nak_budget(&self, default_budget: u32) -> Option<u32> {
        match (self.info.init.endpoint_type, self.info.init.nak_count) {
            (EndpointType::Interrupt, _) => None,
            (_, 0) => Some(default_budget),
            (_, n) => Some(n),
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }
}

impl HostState {
    /// Release a drained pipe's controller state and pool slot
    pub(crate) fn finalize_pipe(&mut self, handle: PipeHandle) {
        self.controller.close_pipe(handle);
        match self.pools.release_pipe_slot(handle) {
            Ok(pipe) => {
                if let Some(device) = self.devices.get_mut(pipe.device) {
                    device.pipes.retain(|p| *p != handle);
                }
                info!(
                    "Closed {} (device {}, ep 0x{:02x})",
                    handle, pipe.info.device_address, pipe.info.init.endpoint_address
                );
            }
            Err(_) => warn!("Finalizing unknown {}", handle),
        }
    }

    /// Finalize every closing pipe whose last transfer has been retired
    pub(crate) fn finalize_closing_pipes(&mut self) {
        let drained: Vec<PipeHandle> = self
            .pools
            .pipes
            .iter()
            .filter(|(_, pipe)| pipe.state == PipeState::Closing && pipe.is_drained())
            .map(|(handle, _)| handle)
            .collect();

        for handle in drained {
            self.finalize_pipe(handle);
        }
    }
}

impl Host {
    /// Open a pipe to an endpoint of an attached device
    ///
    /// The data toggle starts at 0. Ring controllers reserve periodic
    /// bandwidth here.
    pub fn open_pipe(&self, device: DeviceHandle, init: PipeInit) -> Result<PipeHandle> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.ensure_running()?;

        let record = state.devices.get(device).ok_or(HostError::InvalidHandle)?;
        match record.state {
            DeviceState::Attached => {}
            DeviceState::Rejected => return Err(HostError::NotSupported),
            DeviceState::Enumerating | DeviceState::Detaching => {
                return Err(HostError::InvalidHandle);
            }
        }
        init.validate(record.info.speed)?;

        let info = PipeInfo {
            init,
            device_address: record.info.address,
            speed: record.info.speed,
            topology: record.info.topology,
        };
        let handle = state
            .pools
            .allocate_pipe_slot(Pipe::new(device, info.clone()))
            .inspect_err(|_| warn!("No idle pipe for device {}", info.device_address))?;

        if let Err(e) = state.controller.open_pipe(handle, &info) {
            let _ = state.pools.release_pipe_slot(handle);
            return Err(e);
        }

        if let Some(record) = state.devices.get_mut(device) {
            record.pipes.push(handle);
        }
        info!(
            "Opened {} to device {} ep 0x{:02x} ({:?}, mps {})",
            handle, info.device_address, init.endpoint_address, init.endpoint_type, init.max_packet_size
        );
        Ok(handle)
    }

    /// Close a pipe
    ///
    /// Never waits: outstanding transfers are canceled and their completions
    /// arrive through the task loop as usual. The slot returns to the pool
    /// once the last of them has been delivered; until then the handle
    /// refuses new submissions and a second close is `InvalidHandle`.
    pub fn close_pipe(&self, pipe: PipeHandle) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let record = state.pools.pipes.get_mut(pipe).ok_or(HostError::InvalidHandle)?;
        if record.state == PipeState::Closing {
            return Err(HostError::InvalidHandle);
        }
        record.state = PipeState::Closing;

        let bound: Vec<TransferHandle> = record.queue.iter().copied().collect();
        if bound.is_empty() {
            state.finalize_pipe(pipe);
            return Ok(());
        }

        debug!("Closing {} with {} transfer(s) outstanding", pipe, bound.len());
        for transfer in bound {
            if let Err(e) = state.request_abort(transfer) {
                warn!("Cancel of {} during close failed: {}", transfer, e);
            }
        }
        Ok(())
    }

    /// Whether `pipe` is open (not closed and not closing)
    pub fn pipe_state(&self, pipe: PipeHandle) -> Option<PipeState> {
        self.lock().pools.pipes.get(pipe).map(|p| p.state)
    }

    pub fn pipe_info(&self, pipe: PipeHandle) -> Result<PipeInfo> {
        self.lock()
            .pools
            .pipes
            .get(pipe)
            .map(|p| p.info.clone())
            .ok_or(HostError::InvalidHandle)
    }

    /// Current data toggle of a pipe
    pub fn data_toggle(&self, pipe: PipeHandle) -> Result<u8> {
        self.lock()
            .pools
            .pipes
            .get(pipe)
            .map(|p| p.data_toggle)
            .ok_or(HostError::InvalidHandle)
    }

    /// Handle for interface `number` / `alternate_setting` of a device
    pub fn interface_handle(
        &self,
        device: DeviceHandle,
        number: u8,
        alternate_setting: u8,
    ) -> Result<InterfaceHandle> {
        let state = self.lock();
        let record = state.devices.get(device).ok_or(HostError::InvalidHandle)?;
        let slot = record
            .configuration
            .find_interface(number, alternate_setting)
            .ok_or(HostError::InvalidParameter("interface"))?;
        let slot = u8::try_from(slot).map_err(|_| HostError::InvalidParameter("interface"))?;

        Ok(InterfaceHandle { device, slot })
    }

    /// Claim an interface for a class driver
    pub fn open_device_interface(
        &self,
        device: DeviceHandle,
        interface: InterfaceHandle,
    ) -> Result<()> {
        self.set_claimed(device, interface, true)
    }

    /// Release a claimed interface
    pub fn close_device_interface(
        &self,
        device: DeviceHandle,
        interface: InterfaceHandle,
    ) -> Result<()> {
        self.set_claimed(device, interface, false)
    }

    pub fn is_interface_claimed(&self, interface: InterfaceHandle) -> bool {
        let state = self.lock();
        state
            .devices
            .get(interface.device)
            .and_then(|d| d.claimed.get(interface.slot()).copied())
            .unwrap_or(false)
    }

    fn set_claimed(
        &self,
        device: DeviceHandle,
        interface: InterfaceHandle,
        claimed: bool,
    ) -> Result<()> {
        if interface.device != device {
            return Err(HostError::InvalidHandle);
        }
        let mut state = self.lock();
        let record = state
            .devices
            .get_mut(device)
            .filter(|d| d.is_usable())
            .ok_or(HostError::InvalidHandle)?;
        let flag = record
            .claimed
            .get_mut(interface.slot())
            .ok_or(HostError::InvalidHandle)?;
        *flag = claimed;

        debug!(
            "Interface slot {} of {} {}",
            interface.slot(),
            device,
            if claimed { "claimed" } else { "released" }
        );
        Ok(())
    }

    /// Make `alternate_setting` the current setting of the interface's number
    pub fn select_alternate_setting(
        &self,
        interface: InterfaceHandle,
        alternate_setting: u8,
    ) -> Result<InterfaceHandle> {
        let mut state = self.lock();
        let record = state
            .devices
            .get_mut(interface.device)
            .filter(|d| d.is_usable())
            .ok_or(HostError::InvalidHandle)?;
        let number = record
            .configuration
            .interfaces
            .get(interface.slot())
            .map(|i| i.number)
            .ok_or(HostError::InvalidHandle)?;
        let target = record
            .configuration
            .find_interface(number, alternate_setting)
            .ok_or(HostError::InvalidParameter("alternate setting"))?;
        let selected =
            u8::try_from(target).map_err(|_| HostError::InvalidParameter("alternate setting"))?;

        let numbers: Vec<u8> = record.configuration.interfaces.iter().map(|i| i.number).collect();
        for (slot, n) in numbers.into_iter().enumerate() {
            if n == number {
                record.current[slot] = slot == target;
            }
        }

        debug!(
            "Interface {} of {} now at alternate setting {}",
            number, interface.device, alternate_setting
        );
        Ok(InterfaceHandle {
            device: interface.device,
            slot: selected,
        })
    }

    /// Alternate setting currently selected for interface `number`
    pub fn current_alternate_setting(&self, device: DeviceHandle, number: u8) -> Result<u8> {
        let state = self.lock();
        let record = state.devices.get(device).ok_or(HostError::InvalidHandle)?;
        record
            .configuration
            .interfaces
            .iter()
            .zip(&record.current)
            .find(|(i, current)| i.number == number && **current)
            .map(|(i, _)| i.alternate_setting)
            .ok_or(HostError::InvalidParameter("interface"))
    }
}
