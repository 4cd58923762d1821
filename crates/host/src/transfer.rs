//! Transfer records and completion delivery
//!
//! A transfer is checked out of the pool idle, bound to a pipe by
//! send/recv/send_setup, and handed back to the pool by the queue once its
//! completion callback has returned.

use crate::handle::{PipeHandle, TransferHandle};
use protocol::{Direction, SetupPacket, TransferStatus};

/// Lifecycle of a pooled transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// In the pool, not bound to any pipe
    Idle,
    /// Bound to a pipe, waiting for the backend
    Queued,
    /// Handed to the backend
    InFlight,
    Completed,
    Canceled,
    Errored,
}

impl TransferState {
    /// Bound to a pipe and not yet retired
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Queued | Self::InFlight)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Errored)
    }
}

/// Backend-specific result storage
///
/// Which variant a completion carries is fixed by the controller model that
/// owns the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendResult {
    /// Descriptor-ring controllers: first and last descriptor used
    Ring { head: u16, tail: u16 },
    /// Register-based controllers: result code and the frame it finished in
    Register { result: i32, frame: u16 },
}

/// What a completion callback receives
#[derive(Debug)]
pub struct Completion {
    pub transfer: TransferHandle,
    pub pipe: PipeHandle,
    pub status: TransferStatus,
    /// The caller's buffer, handed back
    pub data: Vec<u8>,
    /// Bytes transferred
    pub length: usize,
    /// `None` when the transfer never reached the backend
    pub backend: Option<BackendResult>,
}

impl Completion {
    /// Transferred bytes of the buffer
    pub fn received(&self) -> &[u8] {
        &self.data[..self.length.min(self.data.len())]
    }
}

/// Per-transfer completion callback
///
/// Consumed by value, so it can run at most once.
pub trait TransferCompletion: Send {
    fn complete(self: Box<Self>, completion: Completion);
}

impl<F> TransferCompletion for F
where
    F: FnOnce(Completion) + Send,
{
    fn complete(self: Box<Self>, completion: Completion) {
        (*self)(completion)
    }
}

/// Buffer and callback for one submission
pub struct TransferRequest {
    pub(crate) buffer: Vec<u8>,
    pub(crate) length: usize,
    pub(crate) callback: Box<dyn TransferCompletion>,
}

impl TransferRequest {
    /// Transfer the whole buffer
    pub fn new(buffer: Vec<u8>, callback: impl TransferCompletion + 'static) -> Self {
        Self {
            length: buffer.len(),
            buffer,
            callback: Box::new(callback),
        }
    }

    /// Transfer only the first `length` bytes (clamped to the buffer)
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.min(self.buffer.len());
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("buffer_len", &self.buffer.len())
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Pooled transfer record
pub(crate) struct Transfer {
    pub(crate) state: TransferState,
    pub(crate) pipe: Option<PipeHandle>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) length: usize,
    pub(crate) sofar: usize,
    pub(crate) direction: Direction,
    pub(crate) setup: Option<SetupPacket>,
    pub(crate) callback: Option<Box<dyn TransferCompletion>>,
    pub(crate) status: Option<TransferStatus>,
    pub(crate) backend: Option<BackendResult>,
    pub(crate) naks: u32,
    /// Cancel accepted; the canceled completion is on its way
    pub(crate) abort_pending: bool,
}

impl Transfer {
    pub(crate) fn idle() -> Self {
        Self {
            state: TransferState::Idle,
            pipe: None,
            buffer: Vec::new(),
            length: 0,
            sofar: 0,
            direction: Direction::Out,
            setup: None,
            callback: None,
            status: None,
            backend: None,
            naks: 0,
            abort_pending: false,
        }
    }

    pub(crate) fn bind(
        &mut self,
        pipe: PipeHandle,
        direction: Direction,
        setup: Option<SetupPacket>,
        request: TransferRequest,
    ) {
        self.state = TransferState::Queued;
        self.pipe = Some(pipe);
        self.buffer = request.buffer;
        self.length = request.length;
        self.sofar = 0;
        self.direction = direction;
        self.setup = setup;
        self.callback = Some(request.callback);
        self.status = None;
        self.backend = None;
        self.naks = 0;
        self.abort_pending = false;
    }

    /// Undo `bind` after a synchronous submission failure
    pub(crate) fn unbind(&mut self) {
        *self = Self::idle();
    }

    /// Move to a terminal state and record the outcome
    pub(crate) fn finish(&mut self, status: TransferStatus, backend: Option<BackendResult>) {
        self.state = match status {
            TransferStatus::Success => TransferState::Completed,
            TransferStatus::Canceled => TransferState::Canceled,
            TransferStatus::Stalled | TransferStatus::Failed => TransferState::Errored,
        };
        self.status = Some(status);
        self.backend = backend;
    }

    /// Take the callback and build its completion; `None` if already taken
    pub(crate) fn take_completion(
        &mut self,
        handle: TransferHandle,
    ) -> Option<(Box<dyn TransferCompletion>, Completion)> {
        let callback = self.callback.take()?;
        let pipe = self.pipe?;
        let completion = Completion {
            transfer: handle,
            pipe,
            status: self.status.unwrap_or(TransferStatus::Failed),
            data: std::mem::take(&mut self.buffer),
            length: self.sofar,
            backend: self.backend,
        };
        Some((callback, completion))
    }
}
