//! Common utilities for the USB host workspace
//!
//! This crate provides functionality shared between the host core and the
//! command-line tools: the error type, logging setup, and the bounded event
//! queue that carries hardware events from interrupt context to the task
//! loop.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{EventReceiver, EventSender, create_event_queue};
pub use error::{Error, Result};
pub use logging::setup_logging;
