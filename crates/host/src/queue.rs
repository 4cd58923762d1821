//! Transfer queue
//!
//! Each pipe keeps its bound transfers in submission order. The head of the
//! queue goes to the controller as soon as the controller will take it; the
//! rest wait and are pumped after every retirement. Only the task loop moves
//! a transfer out of `InFlight`.

use crate::backend::{HardwareStatus, IssueRequest, post_canceled};
use crate::error::{HostError, Result};
use crate::handle::{PipeHandle, TransferHandle};
use crate::host::{Host, HostState};
use crate::pipe::PipeState;
use crate::transfer::{Completion, TransferCompletion, TransferRequest, TransferState};
use bytes::Bytes;
use protocol::{Direction, EndpointType, SetupPacket, TransferStatus};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

/// A retired transfer's callback and what to hand it
pub(crate) type Finished = (Box<dyn TransferCompletion>, Completion);

impl HostState {
    /// Bind an idle transfer to an open pipe and issue it if nothing is waiting ahead
    fn submit(
        &mut self,
        pipe: PipeHandle,
        transfer: TransferHandle,
        direction: Direction,
        setup: Option<SetupPacket>,
        request: TransferRequest,
    ) -> Result<()> {
        self.ensure_running()?;

        let record = self.pools.pipes.get(pipe).ok_or(HostError::InvalidHandle)?;
        if record.state != PipeState::Open {
            return Err(HostError::InvalidHandle);
        }
        let waiting = record.queue.iter().any(|t| {
            self.pools
                .transfers
                .get(*t)
                .is_some_and(|t| t.state == TransferState::Queued)
        });

        let slot = self
            .pools
            .transfers
            .get_mut(transfer)
            .ok_or(HostError::InvalidHandle)?;
        if slot.state != TransferState::Idle {
            return Err(HostError::InvalidHandle);
        }
        slot.bind(pipe, direction, setup, request);

        let Some(record) = self.pools.pipes.get_mut(pipe) else {
            return Err(HostError::InvalidHandle);
        };
        record.queue.push_back(transfer);
        let in_flight = record.in_flight;

        if !waiting && self.controller.can_issue(pipe, in_flight) {
            if let Err(e) = self.issue(transfer) {
                debug!("Issue of {} on {} failed: {}", transfer, pipe, e);
                if let Some(record) = self.pools.pipes.get_mut(pipe) {
                    record.queue.retain(|t| *t != transfer);
                }
                if let Some(slot) = self.pools.transfers.get_mut(transfer) {
                    slot.unbind();
                }
                return Err(e);
            }
        } else {
            trace!("Queued {} behind {} on {}", transfer, in_flight, pipe);
        }
        Ok(())
    }

    /// Hand a queued transfer to the controller
    fn issue(&mut self, transfer: TransferHandle) -> Result<()> {
        let slot = self
            .pools
            .transfers
            .get_mut(transfer)
            .ok_or(HostError::InvalidHandle)?;
        let pipe = slot.pipe.ok_or(HostError::InvalidHandle)?;
        let record = self
            .pools
            .pipes
            .get_mut(pipe)
            .ok_or(HostError::InvalidHandle)?;

        self.controller.issue(IssueRequest {
            pipe,
            transfer,
            info: &record.info,
            direction: slot.direction,
            length: slot.length,
            setup: slot.setup,
            data_toggle: record.data_toggle,
        })?;

        slot.state = TransferState::InFlight;
        record.in_flight += 1;
        trace!("Issued {} on {} ({} bytes)", transfer, pipe, slot.length);
        Ok(())
    }

    /// Issue waiting transfers on every open pipe, in queue order
    pub(crate) fn pump(&mut self) {
        if !self.running {
            return;
        }

        for pipe in self.pools.pipes.handles() {
            loop {
                let Some(record) = self.pools.pipes.get(pipe) else {
                    break;
                };
                if record.state != PipeState::Open
                    || !self.controller.can_issue(pipe, record.in_flight)
                {
                    break;
                }
                let next = record.queue.iter().copied().find(|t| {
                    self.pools
                        .transfers
                        .get(*t)
                        .is_some_and(|t| t.state == TransferState::Queued && !t.abort_pending)
                });
                let Some(transfer) = next else {
                    break;
                };

                match self.issue(transfer) {
                    Ok(()) => {}
                    Err(e) if e.is_resource_exhaustion() => {
                        trace!("{} stays queued: {}", transfer, e);
                        break;
                    }
                    Err(e) => {
                        warn!("Failing {} on {}: {}", transfer, pipe, e);
                        self.post_failure(transfer);
                    }
                }
            }
        }
    }

    /// Complete a transfer the controller refused as failed
    fn post_failure(&mut self, transfer: TransferHandle) {
        if let Some(slot) = self.pools.transfers.get_mut(transfer) {
            slot.abort_pending = true;
        }
        let posted = self.interrupt.raise(crate::backend::HardwareEvent::TransferDone {
            transfer,
            status: HardwareStatus::Error,
            length: 0,
            payload: None,
        });
        if let Err(e) = posted {
            error!("Could not post failure for {}: {}", transfer, e);
        }
    }

    /// Ask for a transfer to be aborted; the canceled completion follows later
    pub(crate) fn request_abort(&mut self, transfer: TransferHandle) -> Result<()> {
        let Some(slot) = self.pools.transfers.get_mut(transfer) else {
            debug!("Cancel of stale {}", transfer);
            return Ok(());
        };
        if !slot.state.is_live() || slot.abort_pending {
            return Ok(());
        }

        let result = match slot.state {
            TransferState::InFlight => self.controller.abort(transfer),
            _ => post_canceled(&self.interrupt, transfer),
        };
        match result {
            Ok(()) => {
                slot.abort_pending = true;
                debug!("Cancel accepted for {}", transfer);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Move a live transfer to its terminal state
    ///
    /// Returns the callback to run once the lock is released, or `None` if
    /// the event was stale or the transfer was re-armed after a NAK.
    pub(crate) fn retire(
        &mut self,
        transfer: TransferHandle,
        status: HardwareStatus,
        length: usize,
        payload: Option<Bytes>,
    ) -> Option<Finished> {
        let Some(slot) = self.pools.transfers.get_mut(transfer) else {
            trace!("Completion for stale {}", transfer);
            return None;
        };
        if !slot.state.is_live() {
            trace!("Completion for {} in state {:?} ignored", transfer, slot.state);
            return None;
        }
        let pipe = slot.pipe?;
        let record = self.pools.pipes.get_mut(pipe)?;
        let issued = slot.state == TransferState::InFlight;

        let mut status = status;
        if status == HardwareStatus::Nak {
            if !issued || slot.abort_pending {
                return None;
            }
            slot.naks += 1;
            let exhausted = record
                .nak_budget(self.limits.nak_retry_budget)
                .is_some_and(|budget| slot.naks > budget);
            if !exhausted {
                match self.controller.reissue(transfer) {
                    Ok(()) => return None,
                    Err(e) => warn!("Re-arm of {} failed: {}", transfer, e),
                }
            } else {
                debug!("{} exhausted its NAK budget after {} retries", transfer, slot.naks - 1);
            }
            status = HardwareStatus::Error;
        }

        let backend = if issued {
            record.in_flight = record.in_flight.saturating_sub(1);
            Some(self.controller.retire(transfer, status))
        } else {
            None
        };

        let outcome = match status {
            HardwareStatus::Ack => TransferStatus::Success,
            HardwareStatus::Stall => TransferStatus::Stalled,
            HardwareStatus::Canceled => TransferStatus::Canceled,
            HardwareStatus::Error | HardwareStatus::Nak => TransferStatus::Failed,
        };

        let length = length.min(slot.length);
        if let Some(payload) = payload.filter(|_| slot.direction == Direction::In) {
            let n = payload.len().min(length);
            slot.buffer[..n].copy_from_slice(&payload[..n]);
        }
        slot.sofar = if outcome == TransferStatus::Canceled && !issued {
            0
        } else {
            length
        };

        if record.info.init.endpoint_type != EndpointType::Control {
            match outcome {
                TransferStatus::Success => {
                    let mps = usize::from(record.info.init.max_packet_size.max(1));
                    let packets = slot.sofar.div_ceil(mps).max(1);
                    record.data_toggle ^= (packets & 1) as u8;
                }
                TransferStatus::Stalled => record.data_toggle = 0,
                _ => {}
            }
        }

        record.queue.retain(|t| *t != transfer);
        slot.finish(outcome, backend);
        debug!("{} on {} finished {:?} ({} bytes)", transfer, pipe, outcome, slot.sofar);

        slot.take_completion(transfer)
    }
}

impl Host {
    /// Check out an idle transfer
    pub fn allocate_transfer(&self) -> Result<TransferHandle> {
        self.lock().pools.allocate_transfer()
    }

    /// Return a transfer that was allocated but never submitted
    ///
    /// Submitted transfers go back to the pool on their own after their
    /// completion callback returns.
    pub fn free_transfer(&self, transfer: TransferHandle) -> Result<()> {
        let mut state = self.lock();
        let slot = state
            .pools
            .transfers
            .get(transfer)
            .ok_or(HostError::InvalidHandle)?;
        if slot.state != TransferState::Idle {
            warn!("Free of {} while {:?}", transfer, slot.state);
            return Err(HostError::InvalidHandle);
        }
        state.pools.release_transfer(transfer).map(|_| ())
    }

    /// Lifecycle state of a transfer; `None` once it is back in the pool
    pub fn transfer_state(&self, transfer: TransferHandle) -> Option<TransferState> {
        self.lock().pools.transfers.get(transfer).map(|t| t.state)
    }

    /// Queue an OUT transfer on a bulk, interrupt or isochronous pipe
    pub fn send(
        &self,
        pipe: PipeHandle,
        transfer: TransferHandle,
        request: TransferRequest,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_data_pipe(&state, pipe, Direction::Out)?;
        state.submit(pipe, transfer, Direction::Out, None, request)
    }

    /// Queue an IN transfer on a bulk, interrupt or isochronous pipe
    pub fn recv(
        &self,
        pipe: PipeHandle,
        transfer: TransferHandle,
        request: TransferRequest,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_data_pipe(&state, pipe, Direction::In)?;
        state.submit(pipe, transfer, Direction::In, None, request)
    }

    /// Queue a control transfer (setup, optional data stage, status)
    ///
    /// The data stage direction and length come from the setup packet; the
    /// buffer must hold at least `setup.length` bytes.
    pub fn send_setup(
        &self,
        pipe: PipeHandle,
        transfer: TransferHandle,
        setup: SetupPacket,
        request: TransferRequest,
    ) -> Result<()> {
        let mut state = self.lock();
        let record = state.pools.pipes.get(pipe).ok_or(HostError::InvalidHandle)?;
        if record.info.init.endpoint_type != EndpointType::Control {
            return Err(HostError::InvalidParameter("not a control pipe"));
        }
        let wanted = usize::from(setup.length);
        if request.buffer.len() < wanted {
            return Err(HostError::InvalidParameter("buffer shorter than wLength"));
        }

        let request = TransferRequest {
            length: wanted,
            ..request
        };
        state.submit(pipe, transfer, setup.direction(), Some(setup), request)
    }

    /// Cancel one transfer, or every transfer bound to the pipe
    ///
    /// Only requests the abort. Each canceled transfer still completes
    /// through its callback, with `TransferStatus::Canceled`, from the task
    /// loop. Transfers not bound to this pipe are ignored.
    pub fn cancel(&self, pipe: PipeHandle, transfer: Option<TransferHandle>) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let record = state.pools.pipes.get(pipe).ok_or(HostError::InvalidHandle)?;

        let targets: Vec<TransferHandle> = match transfer {
            Some(t) if record.queue.contains(&t) => vec![t],
            Some(t) => {
                debug!("{} is not bound to {}", t, pipe);
                Vec::new()
            }
            None => record.queue.iter().copied().collect(),
        };

        for t in targets {
            state.request_abort(t)?;
        }
        Ok(())
    }

    /// Allocate and submit an OUT transfer; the receiver resolves on completion
    pub fn send_async(
        &self,
        pipe: PipeHandle,
        data: Vec<u8>,
    ) -> Result<(TransferHandle, oneshot::Receiver<Completion>)> {
        self.submit_async(pipe, data, |host, pipe, transfer, request| {
            host.send(pipe, transfer, request)
        })
    }

    /// Allocate and submit an IN transfer of `length` bytes
    pub fn recv_async(
        &self,
        pipe: PipeHandle,
        length: usize,
    ) -> Result<(TransferHandle, oneshot::Receiver<Completion>)> {
        self.submit_async(pipe, vec![0u8; length], |host, pipe, transfer, request| {
            host.recv(pipe, transfer, request)
        })
    }

    fn submit_async<F>(
        &self,
        pipe: PipeHandle,
        buffer: Vec<u8>,
        submit: F,
    ) -> Result<(TransferHandle, oneshot::Receiver<Completion>)>
    where
        F: FnOnce(&Self, PipeHandle, TransferHandle, TransferRequest) -> Result<()>,
    {
        let transfer = self.allocate_transfer()?;
        let (tx, rx) = oneshot::channel();
        let request = TransferRequest::new(buffer, move |completion: Completion| {
            let _ = tx.send(completion);
        });

        if let Err(e) = submit(self, pipe, transfer, request) {
            let _ = self.free_transfer(transfer);
            return Err(e);
        }
        Ok((transfer, rx))
    }

    fn check_data_pipe(state: &HostState, pipe: PipeHandle, direction: Direction) -> Result<()> {
        let record = state.pools.pipes.get(pipe).ok_or(HostError::InvalidHandle)?;
        if record.info.init.endpoint_type == EndpointType::Control {
            return Err(HostError::InvalidParameter("control pipe needs send_setup"));
        }
        if record.info.init.direction != direction {
            return Err(HostError::InvalidParameter("direction"));
        }
        Ok(())
    }
}
