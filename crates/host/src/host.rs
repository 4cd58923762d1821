//! Host context
//!
//! One `Host` per controller. It owns the device table, the pipe and
//! transfer pools, the controller model and the event queue its interrupt
//! entry point feeds. Several hosts can coexist; nothing here is global.

use crate::backend::{Controller, ControllerId, HardwareEvent, Interrupt, create_controller};
use crate::config::{HostConfig, Limits, PowerSettings};
use crate::device::{Configuration, Device, DeviceInfo, Topology};
use crate::dispatcher::HostCallback;
use crate::error::{Failure, HostError, Result};
use crate::handle::DeviceHandle;
use crate::pool::{ResourcePools, SlotPool};
use bytes::Bytes;
use common::{EventReceiver, create_event_queue};
use protocol::CURRENT_VERSION;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Attribute selector for [`Host::peripheral_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoCode {
    ProductId,
    VendorId,
    /// Total think time of the hubs above the device
    HubThinkTime,
    /// Zero-based index of the running configuration
    ConfigurationIndex,
    /// Length of the raw configuration descriptor
    ConfigurationLength,
    DeviceAddress,
    /// Nesting level below the root hub
    Level,
}

/// Everything guarded by the host lock
pub(crate) struct HostState {
    pub(crate) pools: ResourcePools,
    pub(crate) devices: SlotPool<DeviceHandle, Device>,
    pub(crate) controller: Box<dyn Controller>,
    pub(crate) interrupt: Interrupt,
    pub(crate) limits: Limits,
    #[cfg_attr(not(feature = "low-power"), allow(dead_code))]
    pub(crate) power: PowerSettings,
    #[cfg(feature = "lpm")]
    pub(crate) lpm: crate::power::LpmParams,
    pub(crate) charger_type: Option<u8>,
    pub(crate) running: bool,
    /// Shutdown handed to the task loop; new requests are refused
    pub(crate) stopping: bool,
}

/// Upper bound on hub nesting below the root hub
const MAX_HUB_TIERS: usize = 7;

impl HostState {
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.running && !self.stopping {
            Ok(())
        } else {
            Err(HostError::Error(Failure::NotRunning))
        }
    }

    /// Sum of the think times of every hub between `topology` and the root
    fn upstream_think_time(&self, topology: &Topology) -> u32 {
        let mut total = 0u32;
        let mut hub_address = topology.hub_number;
        for _ in 0..MAX_HUB_TIERS {
            if hub_address == 0 {
                break;
            }
            let Some((_, hub)) = self
                .devices
                .iter()
                .find(|(_, d)| d.info.address == hub_address && d.is_usable())
            else {
                break;
            };
            total = total.saturating_add(hub.info.hub_think_time);
            hub_address = hub.info.topology.hub_number;
        }
        total
    }
}

/// Counts a task loop as active for as long as it lives
pub(crate) struct TaskLoopGuard<'a>(&'a AtomicUsize);

impl<'a> TaskLoopGuard<'a> {
    pub(crate) fn enter(loops: &'a AtomicUsize) -> Self {
        loops.fetch_add(1, Ordering::AcqRel);
        Self(loops)
    }
}

impl Drop for TaskLoopGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct Inner {
    state: Mutex<HostState>,
    pub(crate) events: EventReceiver<HardwareEvent>,
    pub(crate) interrupt: Interrupt,
    pub(crate) callback: Box<dyn HostCallback>,
    pub(crate) task_loops: AtomicUsize,
    controller_id: ControllerId,
}

/// USB host context
#[derive(Clone)]
pub struct Host {
    pub(crate) inner: Arc<Inner>,
}

impl Host {
    /// Start a host on the controller named in `config`
    pub fn new(config: &HostConfig, callback: impl HostCallback + 'static) -> Result<Self> {
        let id: ControllerId = config.host.controller.parse()?;
        Self::with_controller(config, callback, |interrupt| {
            create_controller(id, config, interrupt)
        })
    }

    /// Start a host on a caller-supplied controller driver
    ///
    /// `build` receives the interrupt entry point the controller must use
    /// to report hardware events.
    pub fn with_controller<F>(
        config: &HostConfig,
        callback: impl HostCallback + 'static,
        build: F,
    ) -> Result<Self>
    where
        F: FnOnce(Interrupt) -> Box<dyn Controller>,
    {
        if let Err(e) = config.validate() {
            warn!("Host configuration rejected: {:#}", e);
            return Err(HostError::InvalidParameter("configuration"));
        }
        let pools = &config.pools;

        let (tx, events) = create_event_queue(pools.queue_capacity());
        let interrupt = Interrupt::new(tx);
        let controller = build(interrupt.clone());
        let controller_id = controller.id();

        if !cfg!(feature = "low-power") && config.power.low_power {
            debug!("Low-power support not compiled in, ignoring power.low_power");
        }

        let state = HostState {
            pools: ResourcePools::new(pools.pipes, pools.transfers),
            devices: SlotPool::with_capacity(pools.devices),
            controller,
            interrupt: interrupt.clone(),
            limits: config.limits.clone(),
            power: PowerSettings {
                low_power: cfg!(feature = "low-power") && config.power.low_power,
                lpm: cfg!(feature = "lpm") && config.power.low_power && config.power.lpm,
            },
            #[cfg(feature = "lpm")]
            lpm: crate::power::LpmParams::default(),
            charger_type: None,
            running: true,
            stopping: false,
        };

        info!(
            "USB host {} started on {} ({} devices, {} pipes, {} transfers)",
            CURRENT_VERSION, controller_id, pools.devices, pools.pipes, pools.transfers
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events,
                interrupt,
                callback: Box::new(callback),
                task_loops: AtomicUsize::new(0),
                controller_id,
            }),
        })
    }

    /// Interrupt-context entry point for the controller
    pub fn interrupt(&self) -> Interrupt {
        self.inner.interrupt.clone()
    }

    pub fn controller_id(&self) -> ControllerId {
        self.inner.controller_id
    }

    /// Detach every device (with callbacks), stop the controller and close
    /// the event queue so the task loop returns
    ///
    /// With a task loop running, teardown is queued behind the pending
    /// events and runs on the loop's thread. Returns before that teardown
    /// has finished; join the loop to wait for it. Without a loop, teardown
    /// runs here.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.lock();
            state.ensure_running()?;
            if self.inner.task_loops.load(Ordering::Acquire) == 0 {
                drop(state);
                self.teardown();
                return Ok(());
            }
            state.stopping = true;
        }

        if let Err(e) = self.inner.interrupt.raise(HardwareEvent::Shutdown) {
            warn!("Could not queue shutdown for the task loop ({}), stopping here", e);
            self.teardown();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Packed stack version: `major << 16 | minor << 8 | patch`
    pub fn version() -> u32 {
        CURRENT_VERSION.packed()
    }

    /// Feed the platform millisecond tick to the controller's frame counter
    pub fn update_hw_tick(&self, tick_ms: u32) {
        self.lock().controller.update_frame(tick_ms);
    }

    /// Charger type reported to devices attached from now on
    pub fn set_charger_type(&self, charger_type: u8) {
        debug!("Charger type set to {}", charger_type);
        self.lock().charger_type = Some(charger_type);
    }

    pub fn device_info(&self, device: DeviceHandle) -> Result<DeviceInfo> {
        self.lock()
            .devices
            .get(device)
            .map(|d| d.info.clone())
            .ok_or(HostError::InvalidHandle)
    }

    /// Handles of all devices whose attach callback has returned
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.lock()
            .devices
            .iter()
            .filter(|(_, d)| d.is_settled())
            .map(|(h, _)| h)
            .collect()
    }

    pub fn device_by_address(&self, address: u8) -> Option<DeviceHandle> {
        self.lock()
            .devices
            .iter()
            .find(|(_, d)| d.info.address == address && d.is_settled())
            .map(|(h, _)| h)
    }

    /// Active configuration of a device
    pub fn configuration(&self, device: DeviceHandle) -> Result<Arc<Configuration>> {
        self.lock()
            .devices
            .get(device)
            .map(|d| Arc::clone(&d.configuration))
            .ok_or(HostError::InvalidHandle)
    }

    /// Raw configuration descriptor of a device
    pub fn configuration_descriptor(&self, device: DeviceHandle) -> Result<Bytes> {
        self.configuration(device).map(|c| c.descriptor.clone())
    }

    /// Read one numeric attribute of an attached device
    pub fn peripheral_info(&self, device: DeviceHandle, code: InfoCode) -> Result<u32> {
        let state = self.lock();
        let record = state.devices.get(device).ok_or(HostError::InvalidHandle)?;
        let info = &record.info;

        let value = match code {
            InfoCode::ProductId => u32::from(info.product_id),
            InfoCode::VendorId => u32::from(info.vendor_id),
            InfoCode::HubThinkTime => state.upstream_think_time(&info.topology),
            InfoCode::ConfigurationIndex => u32::from(info.configuration_index),
            InfoCode::ConfigurationLength => {
                u32::try_from(record.configuration.descriptor.len()).unwrap_or(u32::MAX)
            }
            InfoCode::DeviceAddress => u32::from(info.address),
            InfoCode::Level => u32::from(info.topology.level),
        };
        Ok(value)
    }

    /// Hardware events waiting for the task loop
    pub fn pending_events(&self) -> usize {
        self.inner.events.len()
    }

    pub fn transfers_available(&self) -> usize {
        self.lock().pools.transfers_available()
    }

    pub fn pipes_available(&self) -> usize {
        self.lock().pools.pipes_available()
    }

    /// Lock the host state
    ///
    /// Critical sections only link and unlink list entries, so a panic
    /// inside one cannot leave the state half-updated; recover from poison.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HostState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Host state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("controller", &self.inner.controller_id)
            .field("pending_events", &self.inner.events.len())
            .finish_non_exhaustive()
    }
}
