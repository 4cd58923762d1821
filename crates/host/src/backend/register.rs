//! Register-based controller model
//!
//! Each endpoint has one set of transfer registers, so at most one transfer
//! per pipe is on the bus. Data stages go through a small pool of DMA-safe
//! swap buffers shared by all pipes.

use super::{
    BackendKind, Controller, ControllerId, HardwareStatus, Interrupt, IssueRequest, PowerRequest,
    post_canceled,
};
use crate::error::{Failure, HostError, Result};
use crate::handle::{PipeHandle, TransferHandle};
use crate::pipe::PipeInfo;
use crate::transfer::BackendResult;
use protocol::UsbStatus;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Frame numbers wrap at 11 bits
const FRAME_MASK: u32 = 0x7FF;

struct Issued {
    pipe: PipeHandle,
    swap_buffer: bool,
}

pub struct RegisterController {
    id: ControllerId,
    interrupt: Interrupt,
    swap_capacity: usize,
    swap_free: usize,
    /// Open pipes and the transfer occupying their registers
    pipes: HashMap<PipeHandle, Option<TransferHandle>>,
    issued: HashMap<TransferHandle, Issued>,
    frame: u32,
}

impl RegisterController {
    pub fn new(id: ControllerId, swap_buffers: usize, interrupt: Interrupt) -> Self {
        Self {
            id,
            interrupt,
            swap_capacity: swap_buffers,
            swap_free: swap_buffers,
            pipes: HashMap::new(),
            issued: HashMap::new(),
            frame: 0,
        }
    }

    pub fn swap_buffers_free(&self) -> usize {
        self.swap_free
    }

    fn result_code(status: HardwareStatus) -> i32 {
        let status = match status {
            HardwareStatus::Ack => return 0,
            HardwareStatus::Nak => UsbStatus::Retry,
            HardwareStatus::Stall => UsbStatus::TransferStall,
            HardwareStatus::Error => UsbStatus::TransferFailed,
            HardwareStatus::Canceled => UsbStatus::TransferCancel,
        };
        -i32::from(status.code())
    }
}

impl Controller for RegisterController {
    fn id(&self) -> ControllerId {
        self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Register
    }

    fn open_pipe(&mut self, pipe: PipeHandle, info: &PipeInfo) -> Result<()> {
        debug!(
            "{}: open {} ep 0x{:02x} on device {}",
            self.id, pipe, info.init.endpoint_address, info.device_address
        );
        self.pipes.insert(pipe, None);
        Ok(())
    }

    fn close_pipe(&mut self, pipe: PipeHandle) {
        if let Some(Some(transfer)) = self.pipes.remove(&pipe) {
            // Core retires everything before closing; tidy up if it did not
            warn!("{}: closing {} with {} still in flight", self.id, pipe, transfer);
            self.retire(transfer, HardwareStatus::Canceled);
        }
    }

    fn can_issue(&self, pipe: PipeHandle, in_flight: usize) -> bool {
        in_flight == 0 && matches!(self.pipes.get(&pipe), Some(None))
    }

    fn issue(&mut self, request: IssueRequest<'_>) -> Result<()> {
        let Some(slot) = self.pipes.get(&request.pipe) else {
            return Err(HostError::InvalidHandle);
        };
        if slot.is_some() {
            return Err(HostError::Error(Failure::InvalidRequest));
        }

        let swap_buffer = request.length > 0;
        if swap_buffer {
            if self.swap_free == 0 {
                return Err(HostError::LackSwapBuffer);
            }
            self.swap_free -= 1;
        }

        self.pipes.insert(request.pipe, Some(request.transfer));
        self.issued.insert(
            request.transfer,
            Issued {
                pipe: request.pipe,
                swap_buffer,
            },
        );
        trace!(
            "{}: issue {} on {} ({} bytes, toggle {})",
            self.id, request.transfer, request.pipe, request.length, request.data_toggle
        );
        Ok(())
    }

    fn reissue(&mut self, transfer: TransferHandle) -> Result<()> {
        if !self.issued.contains_key(&transfer) {
            return Err(HostError::InvalidHandle);
        }
        trace!("{}: retry {} after NAK", self.id, transfer);
        Ok(())
    }

    fn abort(&mut self, transfer: TransferHandle) -> Result<()> {
        if !self.issued.contains_key(&transfer) {
            return Err(HostError::InvalidHandle);
        }
        debug!("{}: abort {}", self.id, transfer);
        post_canceled(&self.interrupt, transfer)
    }

    fn retire(&mut self, transfer: TransferHandle, status: HardwareStatus) -> BackendResult {
        if let Some(issued) = self.issued.remove(&transfer) {
            if issued.swap_buffer {
                self.swap_free = (self.swap_free + 1).min(self.swap_capacity);
            }
            if let Some(slot) = self.pipes.get_mut(&issued.pipe) {
                *slot = None;
            }
        }

        BackendResult::Register {
            result: Self::result_code(status),
            frame: (self.frame & FRAME_MASK) as u16,
        }
    }

    fn update_frame(&mut self, tick_ms: u32) {
        // Full-speed frames are 1 ms
        self.frame = tick_ms;
    }

    fn power_request(&mut self, address: u8, request: PowerRequest) -> Result<()> {
        match request {
            PowerRequest::L1Sleep { .. } | PowerRequest::L1Resume => Err(HostError::NotSupported),
            PowerRequest::Suspend | PowerRequest::Resume => {
                debug!("{}: {:?} device {}", self.id, request, address);
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        debug!("{}: shutdown with {} transfer(s) issued", self.id, self.issued.len());
        self.issued.clear();
        self.pipes.clear();
        self.swap_free = self.swap_capacity;
    }
}
