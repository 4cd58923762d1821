//! Device records
//!
//! A device record is created on an attach event and destroyed on the
//! matching detach event. It owns the active configuration (interfaces and
//! endpoints in bounded lists) and the list of pipes opened against it.

use crate::bounded::{Bounded, CapacityExceeded};
use crate::config::Limits;
use crate::handle::{DeviceHandle, PipeHandle};
use bytes::Bytes;
use protocol::{DeviceSpeed, Direction, EndpointType};
use std::sync::Arc;

/// Where a device hangs in the bus tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Topology {
    /// Address of the first upstream hub (0 = root hub)
    pub hub_number: u8,
    /// Port on that hub
    pub port_number: u8,
    /// Address of the nearest upstream high-speed hub (transaction translator)
    pub hs_hub_number: u8,
    /// Port on the high-speed hub
    pub hs_hub_port: u8,
    /// Nesting level (root device = 0)
    pub level: u8,
}

impl Topology {
    /// Device on a root-hub port
    pub fn root(port_number: u8) -> Self {
        Self {
            port_number,
            ..Self::default()
        }
    }

    /// Device behind hub `hub_address`, one level below it
    pub fn behind_hub(hub_address: u8, port_number: u8, hub_level: u8) -> Self {
        Self {
            hub_number: hub_address,
            port_number,
            level: hub_level + 1,
            ..Self::default()
        }
    }

    pub fn with_tt(mut self, hs_hub_number: u8, hs_hub_port: u8) -> Self {
        self.hs_hub_number = hs_hub_number;
        self.hs_hub_port = hs_hub_port;
        self
    }

    pub fn is_root(&self) -> bool {
        self.hub_number == 0
    }
}

/// Endpoint of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// bEndpointAddress (bit 7 = direction)
    pub address: u8,
    pub endpoint_type: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
    /// Class/vendor descriptors following the endpoint descriptor
    pub extension: Bytes,
}

impl Endpoint {
    pub fn new(address: u8, endpoint_type: EndpointType, max_packet_size: u16, interval: u8) -> Self {
        Self {
            address,
            endpoint_type,
            max_packet_size,
            interval,
            extension: Bytes::new(),
        }
    }

    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    pub fn direction(&self) -> Direction {
        Direction::from_bit7(self.address)
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Bounded<Endpoint>,
    pub extension: Bytes,
}

/// Active configuration of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Zero-based configuration index
    pub index: u8,
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Bounded<Interface>,
    /// Raw configuration descriptor bytes
    pub descriptor: Bytes,
    /// Vendor extension bytes
    pub extension: Bytes,
}

impl Configuration {
    /// Build from an enumerated description, enforcing the configured capacities
    pub fn build(
        description: &ConfigurationDescription,
        limits: &Limits,
    ) -> Result<Self, CapacityExceeded> {
        let mut interfaces = Bounded::new(limits.interfaces_per_configuration);

        for desc in &description.interfaces {
            let mut endpoints = Bounded::new(limits.endpoints_per_interface);
            for endpoint in &desc.endpoints {
                endpoints.try_push(endpoint.clone())?;
            }
            interfaces.try_push(Interface {
                number: desc.number,
                alternate_setting: desc.alternate_setting,
                class: desc.class,
                subclass: desc.subclass,
                protocol: desc.protocol,
                endpoints,
                extension: desc.extension.clone(),
            })?;
        }

        Ok(Self {
            index: description.index,
            value: description.value,
            interfaces,
            descriptor: description.descriptor.clone(),
            extension: description.extension.clone(),
        })
    }

    /// Position of interface `number` with `alternate_setting`
    pub fn find_interface(&self, number: u8, alternate_setting: u8) -> Option<usize> {
        self.interfaces
            .iter()
            .position(|i| i.number == number && i.alternate_setting == alternate_setting)
    }
}

/// Interface as reported by enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescription {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<Endpoint>,
    pub extension: Bytes,
}

impl InterfaceDescription {
    pub fn new(number: u8, alternate_setting: u8, class: u8) -> Self {
        Self {
            number,
            alternate_setting,
            class,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }
}

/// Configuration as reported by enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDescription {
    pub index: u8,
    pub value: u8,
    pub interfaces: Vec<InterfaceDescription>,
    pub descriptor: Bytes,
    pub extension: Bytes,
}

/// Everything a backend knows about a device once enumeration succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub address: u8,
    pub speed: DeviceSpeed,
    pub topology: Topology,
    pub vendor_id: u16,
    pub product_id: u16,
    pub is_hub: bool,
    /// Hub think time in bit times (hubs only)
    pub hub_think_time: u32,
    pub configuration: ConfigurationDescription,
}

impl DeviceDescription {
    pub fn new(address: u8, speed: DeviceSpeed) -> Self {
        Self {
            address,
            speed,
            topology: Topology::root(1),
            vendor_id: 0,
            product_id: 0,
            is_hub: false,
            hub_think_time: 0,
            configuration: ConfigurationDescription {
                value: 1,
                ..ConfigurationDescription::default()
            },
        }
    }

    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn as_hub(mut self, think_time: u32) -> Self {
        self.is_hub = true;
        self.hub_think_time = think_time;
        self
    }

    pub fn with_interface(mut self, interface: InterfaceDescription) -> Self {
        self.configuration.interfaces.push(interface);
        self
    }

    pub fn with_descriptor(mut self, descriptor: Bytes) -> Self {
        self.configuration.descriptor = descriptor;
        self
    }
}

/// Snapshot of a device's attributes, handed to host callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// `None` when enumeration failed before a record existed
    pub handle: Option<DeviceHandle>,
    pub address: u8,
    pub speed: DeviceSpeed,
    pub topology: Topology,
    pub vendor_id: u16,
    pub product_id: u16,
    pub is_hub: bool,
    pub hub_think_time: u32,
    pub configuration_index: u8,
    pub charger_type: Option<u8>,
}

impl DeviceInfo {
    pub(crate) fn from_description(
        handle: Option<DeviceHandle>,
        desc: &DeviceDescription,
        charger_type: Option<u8>,
    ) -> Self {
        Self {
            handle,
            address: desc.address,
            speed: desc.speed,
            topology: desc.topology,
            vendor_id: desc.vendor_id,
            product_id: desc.product_id,
            is_hub: desc.is_hub,
            hub_think_time: desc.hub_think_time,
            configuration_index: desc.configuration.index,
            charger_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceState {
    /// Record created, attach callback not yet returned; hidden from lookups
    Enumerating,
    /// Attach callback accepted the device; pipes may be opened
    Attached,
    /// Host callback declined the device
    Rejected,
    /// Detach in progress; no new pipes
    Detaching,
}

/// Device table entry
pub(crate) struct Device {
    pub(crate) info: DeviceInfo,
    pub(crate) configuration: Arc<Configuration>,
    pub(crate) state: DeviceState,
    /// Claimed flag per interface slot
    pub(crate) claimed: Vec<bool>,
    /// Current flag per interface slot; one per interface number
    pub(crate) current: Vec<bool>,
    pub(crate) pipes: Vec<PipeHandle>,
    #[cfg(feature = "low-power")]
    pub(crate) power: crate::power::PowerState,
}

impl Device {
    pub(crate) fn new(info: DeviceInfo, configuration: Configuration) -> Self {
        let slots = configuration.interfaces.len();
        // Lowest alternate setting of each interface number starts out current
        let mut current = vec![false; slots];
        for (slot, interface) in configuration.interfaces.iter().enumerate() {
            let lowest = configuration
                .interfaces
                .iter()
                .filter(|i| i.number == interface.number)
                .map(|i| i.alternate_setting)
                .min();
            current[slot] = lowest == Some(interface.alternate_setting);
        }

        Self {
            info,
            configuration: Arc::new(configuration),
            state: DeviceState::Enumerating,
            claimed: vec![false; slots],
            current,
            pipes: Vec::new(),
            #[cfg(feature = "low-power")]
            power: crate::power::PowerState::Active,
        }
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.state != DeviceState::Detaching
    }

    /// Attach callback has returned and no detach has started
    pub(crate) fn is_settled(&self) -> bool {
        matches!(self.state, DeviceState::Attached | DeviceState::Rejected)
    }
}
