//! Task loop thread
//!
//! RTOS-style deployment: the task loop runs on its own named thread and
//! blocks on the event queue between interrupts. Bare-metal builds call
//! [`Host::task_once`] from their main loop instead.

use crate::host::Host;
use std::io;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Run the host task loop on a dedicated thread
///
/// The thread exits after [`Host::shutdown`] or a hardware shutdown event.
pub fn spawn_task_loop(host: Host) -> io::Result<JoinHandle<()>> {
    let name = format!("usb-host-{}", host.controller_id());
    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
        host.run_task();
    })?;

    info!("Spawned task loop thread {}", name);
    Ok(handle)
}
