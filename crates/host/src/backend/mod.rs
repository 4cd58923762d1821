//! Controller backends
//!
//! The core talks to a controller through [`Controller`] and receives its
//! hardware events through an [`Interrupt`]. Two controller models are
//! built in: register-based (one transfer in flight per endpoint, DMA bounce
//! buffers) and descriptor-ring based (transfer descriptors from a shared
//! ring, periodic bandwidth reservation).

pub mod register;
pub mod ring;

pub use register::RegisterController;
pub use ring::RingController;

use crate::config::HostConfig;
use crate::device::{DeviceDescription, Topology};
use crate::error::{HostError, Result};
use crate::handle::{PipeHandle, TransferHandle};
use crate::pipe::PipeInfo;
use crate::transfer::BackendResult;
use bytes::Bytes;
use common::EventSender;
use protocol::{DeviceSpeed, Direction, SetupPacket, UsbStatus};
use std::fmt;
use std::str::FromStr;

/// How a controller stores per-transfer results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Register,
    Ring,
}

/// Supported controller types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerId {
    Khci,
    Ehci,
    Ohci,
    Ip3516Hs,
}

impl ControllerId {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Khci => BackendKind::Register,
            Self::Ehci | Self::Ohci | Self::Ip3516Hs => BackendKind::Ring,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Khci => "khci",
            Self::Ehci => "ehci",
            Self::Ohci => "ohci",
            Self::Ip3516Hs => "ip3516hs",
        }
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerId {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "khci" => Ok(Self::Khci),
            "ehci" => Ok(Self::Ehci),
            "ohci" => Ok(Self::Ohci),
            "ip3516hs" => Ok(Self::Ip3516Hs),
            _ => Err(HostError::ControllerNotFound(s.to_string())),
        }
    }
}

/// Bus-level outcome of one transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStatus {
    Ack,
    /// Endpoint not ready; the transfer may be retried
    Nak,
    Stall,
    /// Transaction error, babble, timeout
    Error,
    /// Aborted on request
    Canceled,
}

/// Power request handed to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    Suspend,
    Resume,
    /// Enter L1 with the configured host-initiated resume duration
    L1Sleep { hird: u8, remote_wakeup: bool },
    L1Resume,
}

/// Controller's answer to a power request, or a bus-initiated wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOutcome {
    Suspended,
    SuspendFailed,
    Resumed,
    ResumeFailed,
    /// Device signalled remote wake-up
    ResumeDetected,
    /// L1 entry answered with ACK
    L1Ack,
    /// L1 entry answered with NYET
    L1Nyet,
    /// L1 entry answered with STALL
    L1Stall,
    L1Error,
    L1Resumed,
    L1ResumeFailed,
    L1ResumeDetected,
}

/// Events raised from interrupt context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    /// Enumeration finished
    Attached(DeviceDescription),
    Detached { address: u8 },
    EnumerationFailed {
        address: u8,
        speed: DeviceSpeed,
        topology: Topology,
        reason: UsbStatus,
    },
    TransferDone {
        transfer: TransferHandle,
        status: HardwareStatus,
        length: usize,
        /// Received bytes (IN transfers)
        payload: Option<Bytes>,
    },
    Power { address: u8, outcome: PowerOutcome },
    /// Stop the task loop
    Shutdown,
}

/// Interrupt-context entry point
///
/// Only ever enqueues; never takes a lock the task loop holds.
#[derive(Clone)]
pub struct Interrupt {
    tx: EventSender<HardwareEvent>,
}

impl Interrupt {
    pub(crate) fn new(tx: EventSender<HardwareEvent>) -> Self {
        Self { tx }
    }

    /// Record a hardware event and wake the task loop
    pub fn raise(&self, event: HardwareEvent) -> common::Result<()> {
        self.tx.try_post(event)
    }

    /// Events rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.tx.dropped()
    }

    pub(crate) fn close(&self) {
        self.tx.close();
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("dropped", &self.tx.dropped())
            .finish()
    }
}

/// One transfer handed to the controller
#[derive(Debug)]
pub struct IssueRequest<'a> {
    pub pipe: PipeHandle,
    pub transfer: TransferHandle,
    pub info: &'a PipeInfo,
    pub direction: Direction,
    pub length: usize,
    pub setup: Option<SetupPacket>,
    pub data_toggle: u8,
}

/// Controller driver as seen by the core
///
/// All calls are made by the core with its state lock held and must not
/// block. Completions are reported later through the [`Interrupt`] the
/// controller was built with.
pub trait Controller: Send {
    fn id(&self) -> ControllerId;

    fn kind(&self) -> BackendKind {
        self.id().kind()
    }

    /// Prepare endpoint state and reserve bandwidth
    fn open_pipe(&mut self, pipe: PipeHandle, info: &PipeInfo) -> Result<()>;

    /// Release endpoint state and bandwidth
    fn close_pipe(&mut self, pipe: PipeHandle);

    /// Whether another transfer may go to the hardware with `in_flight` outstanding
    fn can_issue(&self, pipe: PipeHandle, in_flight: usize) -> bool;

    fn issue(&mut self, request: IssueRequest<'_>) -> Result<()>;

    /// Retry after a NAK
    fn reissue(&mut self, transfer: TransferHandle) -> Result<()>;

    /// Request an abort; the canceled completion arrives through the interrupt
    fn abort(&mut self, transfer: TransferHandle) -> Result<()>;

    /// Release per-transfer resources and report backend result storage
    fn retire(&mut self, transfer: TransferHandle, status: HardwareStatus) -> BackendResult;

    /// Millisecond tick from the platform timer
    fn update_frame(&mut self, tick_ms: u32);

    fn power_request(&mut self, address: u8, request: PowerRequest) -> Result<()>;

    fn shutdown(&mut self);
}

/// Build the controller model for `id`
pub fn create_controller(
    id: ControllerId,
    config: &HostConfig,
    interrupt: Interrupt,
) -> Box<dyn Controller> {
    match id.kind() {
        BackendKind::Register => Box::new(RegisterController::new(
            id,
            config.register.swap_buffers,
            interrupt,
        )),
        BackendKind::Ring => Box::new(RingController::new(
            id,
            config.ring.descriptors,
            config.ring.bytes_per_descriptor,
            interrupt,
        )),
    }
}

/// Post a canceled completion for `transfer`
pub(crate) fn post_canceled(interrupt: &Interrupt, transfer: TransferHandle) -> Result<()> {
    interrupt
        .raise(HardwareEvent::TransferDone {
            transfer,
            status: HardwareStatus::Canceled,
            length: 0,
            payload: None,
        })
        .map_err(|_| HostError::Error(crate::error::Failure::EventQueueFull))
}
