//! USB type definitions
//!
//! Wire-level vocabulary shared by the host core and its backends:
//! device speed, transfer direction, endpoint type and the control
//! setup packet.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// USB device speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
}

impl DeviceSpeed {
    /// Frame period in microseconds (1 ms frames below high speed, 125 µs microframes above)
    pub fn frame_period_us(&self) -> u32 {
        match self {
            Self::Low | Self::Full => 1000,
            Self::High | Self::Super => 125,
        }
    }

    /// Bytes per (micro)frame available to periodic transfers.
    ///
    /// 90% of a full-speed frame (1500 bytes) and 80% of a high-speed
    /// microframe (7500 bytes).
    pub fn periodic_budget_bytes(&self) -> u32 {
        match self {
            Self::Low | Self::Full => 1500 * 90 / 100,
            Self::High | Self::Super => 7500 * 80 / 100,
        }
    }

    /// Largest max-packet-size the endpoint type may declare at this speed
    pub fn max_packet_limit(&self, endpoint_type: EndpointType) -> u16 {
        match (self, endpoint_type) {
            (Self::Low, EndpointType::Control | EndpointType::Interrupt) => 8,
            (Self::Low, _) => 0,
            (Self::Full, EndpointType::Isochronous) => 1023,
            (Self::Full, _) => 64,
            (Self::High, EndpointType::Control) => 64,
            (Self::High, EndpointType::Bulk) => 512,
            (Self::High, _) => 1024,
            (Self::Super, EndpointType::Control) => 512,
            (Self::Super, _) => 1024,
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address or bmRequestType
    pub fn from_bit7(value: u8) -> Self {
        if value & 0x80 != 0 { Self::In } else { Self::Out }
    }
}

/// Endpoint (pipe) transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointType {
    /// Interrupt and isochronous endpoints are scheduled per (micro)frame
    pub fn is_periodic(&self) -> bool {
        matches!(self, Self::Interrupt | Self::Isochronous)
    }

    /// Decode from the bmAttributes field of an endpoint descriptor
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }
}

/// USB setup packet (8 bytes, little-endian fields)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    pub const fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    /// Standard GET_DESCRIPTOR request
    pub const fn get_descriptor(descriptor_type: u8, descriptor_index: u8, length: u16) -> Self {
        Self::new(
            0x80,
            0x06,
            ((descriptor_type as u16) << 8) | descriptor_index as u16,
            0,
            length,
        )
    }

    /// Standard SET_CONFIGURATION request
    pub const fn set_configuration(value: u8) -> Self {
        Self::new(0x00, 0x09, value as u16, 0, 0)
    }

    /// Data stage direction
    pub fn direction(&self) -> Direction {
        Direction::from_bit7(self.request_type)
    }

    /// Check if this transfer has a data stage
    pub fn has_data(&self) -> bool {
        self.length > 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.request_type;
        buf[1] = self.request;
        LittleEndian::write_u16(&mut buf[2..4], self.value);
        LittleEndian::write_u16(&mut buf[4..6], self.index);
        LittleEndian::write_u16(&mut buf[6..8], self.length);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            request_type: buf[0],
            request: buf[1],
            value: LittleEndian::read_u16(&buf[2..4]),
            index: LittleEndian::read_u16(&buf[4..6]),
            length: LittleEndian::read_u16(&buf[6..8]),
        })
    }
}
