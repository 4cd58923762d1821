//! Generation-tagged handles
//!
//! Every record the host hands out (device, pipe, transfer) lives in a
//! fixed-capacity slot pool. A handle names the slot and the generation the
//! slot had when it was checked out; the generation advances on every
//! check-in, so a stale handle can never alias a later occupant.

use std::fmt;

/// Slot index plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub(crate) index: u16,
    pub(crate) generation: u32,
}

/// Typed handle into a [`crate::pool::SlotPool`]
pub trait PoolHandle: Copy + Eq + fmt::Debug {
    fn from_key(key: SlotKey) -> Self;
    fn key(&self) -> SlotKey;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(SlotKey);

        impl $name {
            /// Slot position inside the owning pool
            pub fn index(&self) -> usize {
                usize::from(self.0.index)
            }

            pub fn generation(&self) -> u32 {
                self.0.generation
            }
        }

        impl PoolHandle for $name {
            fn from_key(key: SlotKey) -> Self {
                Self(key)
            }

            fn key(&self) -> SlotKey {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}.{}", $prefix, self.0.index, self.0.generation)
            }
        }
    };
}

define_handle!(
    /// Attached device in the device table
    DeviceHandle,
    "dev"
);
define_handle!(
    /// Open pipe
    PipeHandle,
    "pipe"
);
define_handle!(
    /// Pooled transfer
    TransferHandle,
    "xfer"
);

/// One interface (alternate setting) of a device's active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle {
    pub(crate) device: DeviceHandle,
    pub(crate) slot: u8,
}

impl InterfaceHandle {
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Position of the interface inside the configuration
    pub fn slot(&self) -> usize {
        usize::from(self.slot)
    }
}
