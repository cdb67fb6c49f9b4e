//! USB descriptor snapshot and transfer types
//!
//! These types describe a device as seen through the host USB layer: the
//! configuration tree the audio negotiator walks, the packets returned by an
//! isochronous transfer, and the error codes a transfer can fail with.

use serde::{Deserialize, Serialize};

/// USB interface class: Audio
pub const USB_CLASS_AUDIO: u8 = 0x01;

/// Audio interface subclass: AudioStreaming
pub const USB_SUBCLASS_AUDIO_STREAMING: u8 = 0x02;

/// Transfer direction, relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint number (address without the direction bit)
    pub number: u8,
    pub direction: Direction,
    pub kind: EndpointKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// Endpoint address including the direction bit (e.g. `0x81`)
    pub fn address(&self) -> u8 {
        match self.direction {
            Direction::In => self.number | 0x80,
            Direction::Out => self.number,
        }
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateInfo {
    pub setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl AlternateInfo {
    /// Whether this alternate is a USB Audio streaming alternate
    pub fn is_audio_streaming(&self) -> bool {
        self.class == USB_CLASS_AUDIO && self.subclass == USB_SUBCLASS_AUDIO_STREAMING
    }
}

/// Interface with its alternates and current host-side state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub number: u8,
    /// Whether the interface is currently claimed by this host
    pub claimed: bool,
    /// Currently selected alternate setting
    pub active_alternate: u8,
    /// Alternates in device-declared order
    pub alternates: Vec<AlternateInfo>,
}

/// Configuration with its interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    /// bConfigurationValue
    pub value: u8,
    /// Interfaces in device-declared order
    pub interfaces: Vec<InterfaceInfo>,
}

/// Payload of one isochronous packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoPacket {
    pub data: Vec<u8>,
}

impl IsoPacket {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

/// USB transfer error codes
///
/// Maps to libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
pub enum UsbError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Operation not supported by the host USB layer
    #[error("operation not supported")]
    NotSupported,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}
