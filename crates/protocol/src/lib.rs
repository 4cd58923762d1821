//! USB host protocol vocabulary
//!
//! Types shared by the host core, its controller backends and class
//! drivers: device speed, direction, endpoint type, the control setup
//! packet, numeric status codes and host event codes.
//!
//! # Example
//!
//! ```
//! use protocol::{HostEvent, SetupPacket, UsbStatus};
//!
//! let setup = SetupPacket::get_descriptor(0x01, 0, 18);
//! assert_eq!(setup.to_bytes()[1], 0x06);
//!
//! let event = HostEvent::EnumerationFailed(UsbStatus::TransferFailed);
//! assert_eq!(HostEvent::from_code(event.code()).unwrap(), event);
//! ```

pub mod error;
pub mod event;
pub mod status;
pub mod types;
pub mod version;

pub use error::{ProtocolError, Result};
pub use event::HostEvent;
pub use status::{TransferStatus, UsbStatus};
pub use types::{DeviceSpeed, Direction, EndpointType, SetupPacket};
pub use version::{CURRENT_VERSION, StackVersion};
