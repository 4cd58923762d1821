//! Descriptor-ring controller model
//!
//! Transfers are described by descriptors drawn from one shared ring; each
//! descriptor covers `bytes_per_descriptor` bytes of data and control
//! transfers take two more for the setup and status stages. Periodic pipes
//! reserve bandwidth per (micro)frame when they are opened.

use super::{
    BackendKind, Controller, ControllerId, HardwareStatus, Interrupt, IssueRequest, PowerRequest,
    post_canceled,
};
use crate::error::{Failure, HostError, Result};
use crate::handle::{PipeHandle, TransferHandle};
use crate::pipe::PipeInfo;
use crate::transfer::BackendResult;
use protocol::DeviceSpeed;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Periodic bandwidth accounting for one speed class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthPool {
    budget: u32,
    used: u32,
}

impl BandwidthPool {
    pub fn new(speed: DeviceSpeed) -> Self {
        Self {
            budget: speed.periodic_budget_bytes(),
            used: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.budget.saturating_sub(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    fn reserve(&mut self, bytes: u32) -> Result<()> {
        if bytes > self.available() {
            return Err(HostError::Error(Failure::InsufficientBandwidth));
        }
        self.used += bytes;
        Ok(())
    }

    fn release(&mut self, bytes: u32) {
        self.used = self.used.saturating_sub(bytes);
    }
}

struct RingPipe {
    high_speed: bool,
    reserved: u32,
}

struct Issued {
    descriptors: Vec<u16>,
}

pub struct RingController {
    id: ControllerId,
    interrupt: Interrupt,
    bytes_per_descriptor: usize,
    /// Free descriptor indices
    free: Vec<u16>,
    pipes: HashMap<PipeHandle, RingPipe>,
    issued: HashMap<TransferHandle, Issued>,
    full_speed: BandwidthPool,
    high_speed: BandwidthPool,
    frame: u32,
}

impl RingController {
    pub fn new(
        id: ControllerId,
        descriptors: usize,
        bytes_per_descriptor: usize,
        interrupt: Interrupt,
    ) -> Self {
        let descriptors = descriptors.min(usize::from(u16::MAX));
        Self {
            id,
            interrupt,
            bytes_per_descriptor: bytes_per_descriptor.max(1),
            free: (0..descriptors as u16).rev().collect(),
            pipes: HashMap::new(),
            issued: HashMap::new(),
            full_speed: BandwidthPool::new(DeviceSpeed::Full),
            high_speed: BandwidthPool::new(DeviceSpeed::High),
            frame: 0,
        }
    }

    pub fn free_descriptors(&self) -> usize {
        self.free.len()
    }

    pub fn bandwidth(&self, speed: DeviceSpeed) -> &BandwidthPool {
        match speed {
            DeviceSpeed::Low | DeviceSpeed::Full => &self.full_speed,
            DeviceSpeed::High | DeviceSpeed::Super => &self.high_speed,
        }
    }

    fn pool_mut(&mut self, high_speed: bool) -> &mut BandwidthPool {
        if high_speed {
            &mut self.high_speed
        } else {
            &mut self.full_speed
        }
    }

    /// Descriptors needed for a transfer of `length` bytes
    pub fn descriptors_for(&self, length: usize, control: bool) -> usize {
        let data = length.div_ceil(self.bytes_per_descriptor).max(1);
        if control { data + 2 } else { data }
    }

    /// Bytes per (micro)frame a periodic pipe occupies
    fn periodic_cost(info: &PipeInfo) -> u32 {
        u32::from(info.init.max_packet_size) * u32::from(info.init.transactions_per_microframe.max(1))
    }
}

impl Controller for RingController {
    fn id(&self) -> ControllerId {
        self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ring
    }

    fn open_pipe(&mut self, pipe: PipeHandle, info: &PipeInfo) -> Result<()> {
        let high_speed = matches!(info.speed, DeviceSpeed::High | DeviceSpeed::Super);
        let reserved = if info.init.endpoint_type.is_periodic() {
            let cost = Self::periodic_cost(info);
            let id = self.id;
            self.pool_mut(high_speed).reserve(cost).inspect_err(|_| {
                warn!(
                    "{}: {} bytes/frame for ep 0x{:02x} exceeds remaining bandwidth",
                    id, cost, info.init.endpoint_address
                );
            })?;
            cost
        } else {
            0
        };

        debug!(
            "{}: open {} ep 0x{:02x} on device {} ({} bytes/frame reserved)",
            self.id, pipe, info.init.endpoint_address, info.device_address, reserved
        );
        self.pipes.insert(
            pipe,
            RingPipe {
                high_speed,
                reserved,
            },
        );
        Ok(())
    }

    fn close_pipe(&mut self, pipe: PipeHandle) {
        if let Some(state) = self.pipes.remove(&pipe) {
            self.pool_mut(state.high_speed).release(state.reserved);
        }
    }

    fn can_issue(&self, pipe: PipeHandle, _in_flight: usize) -> bool {
        self.pipes.contains_key(&pipe)
    }

    fn issue(&mut self, request: IssueRequest<'_>) -> Result<()> {
        if !self.pipes.contains_key(&request.pipe) {
            return Err(HostError::InvalidHandle);
        }

        let needed = self.descriptors_for(request.length, request.setup.is_some());
        if self.free.len() < needed {
            return Err(HostError::Error(Failure::NoFreeDescriptor));
        }
        let split = self.free.len() - needed;
        let mut descriptors = self.free.split_off(split);
        descriptors.reverse();

        trace!(
            "{}: issue {} on {} with {} descriptor(s)",
            self.id, request.transfer, request.pipe, needed
        );
        self.issued.insert(request.transfer, Issued { descriptors });
        Ok(())
    }

    fn reissue(&mut self, transfer: TransferHandle) -> Result<()> {
        if !self.issued.contains_key(&transfer) {
            return Err(HostError::InvalidHandle);
        }
        trace!("{}: re-arm {} after NAK", self.id, transfer);
        Ok(())
    }

    fn abort(&mut self, transfer: TransferHandle) -> Result<()> {
        if !self.issued.contains_key(&transfer) {
            return Err(HostError::InvalidHandle);
        }
        debug!("{}: unlink {}", self.id, transfer);
        post_canceled(&self.interrupt, transfer)
    }

    fn retire(&mut self, transfer: TransferHandle, _status: HardwareStatus) -> BackendResult {
        let Some(issued) = self.issued.remove(&transfer) else {
            return BackendResult::Ring { head: 0, tail: 0 };
        };
        let head = issued.descriptors.first().copied().unwrap_or(0);
        let tail = issued.descriptors.last().copied().unwrap_or(0);
        self.free.extend(issued.descriptors.into_iter().rev());

        BackendResult::Ring { head, tail }
    }

    fn update_frame(&mut self, tick_ms: u32) {
        self.frame = tick_ms;
    }

    fn power_request(&mut self, address: u8, request: PowerRequest) -> Result<()> {
        debug!(
            "{}: {:?} device {} at frame {}",
            self.id, request, address, self.frame
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("{}: shutdown with {} transfer(s) linked", self.id, self.issued.len());
        let issued: Vec<TransferHandle> = self.issued.keys().copied().collect();
        for transfer in issued {
            self.retire(transfer, HardwareStatus::Canceled);
        }
        let pipes: Vec<PipeHandle> = self.pipes.keys().copied().collect();
        for pipe in pipes {
            self.close_pipe(pipe);
        }
    }
}
