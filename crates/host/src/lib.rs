//! USB host stack core
//!
//! Controller-agnostic host layer: device attach/detach lifecycle, pipes to
//! device endpoints, asynchronous transfer queues with cancellation, and
//! dispatch of completions from interrupt context through a task loop.
//!
//! # Example
//!
//! ```
//! use host::test_utils::{CompletionLog, bulk_device, test_host};
//! use host::{PipeInit, TransferRequest};
//! use protocol::TransferStatus;
//!
//! let (host, callback, hardware) = test_host("ehci");
//! hardware.attach(bulk_device(1)).unwrap();
//! host.task_once();
//! let device = callback.last_attached().unwrap();
//!
//! let pipe = host.open_pipe(device, PipeInit::bulk(0x02, 512)).unwrap();
//! let transfer = host.allocate_transfer().unwrap();
//! let log = CompletionLog::new();
//! host.send(pipe, transfer, TransferRequest::new(vec![0xAA; 64], log.callback()))
//!     .unwrap();
//!
//! hardware.complete(transfer, 64).unwrap();
//! host.task_once();
//! assert_eq!(log.statuses(), vec![TransferStatus::Success]);
//! ```

pub mod backend;
pub mod bounded;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod host;
pub mod pipe;
pub mod pool;
#[cfg(feature = "low-power")]
pub mod power;
pub mod queue;
pub mod test_utils;
pub mod transfer;
pub mod worker;

pub use backend::{
    BackendKind, Controller, ControllerId, HardwareEvent, HardwareStatus, Interrupt, PowerOutcome,
    PowerRequest,
};
pub use config::HostConfig;
pub use device::{Configuration, DeviceDescription, DeviceInfo, Endpoint, Interface, Topology};
pub use dispatcher::{CallbackStatus, HostCallback};
pub use error::{Failure, HostError, Result};
pub use handle::{DeviceHandle, InterfaceHandle, PipeHandle, TransferHandle};
pub use host::{Host, InfoCode};
pub use pipe::{PipeInfo, PipeInit, PipeState};
#[cfg(feature = "lpm")]
pub use power::LpmParams;
#[cfg(feature = "low-power")]
pub use power::PowerState;
pub use transfer::{BackendResult, Completion, TransferCompletion, TransferRequest, TransferState};
pub use worker::spawn_task_loop;
