//! AOA vendor requests
//!
//! Every AOA operation is a single vendor-class, device-recipient control
//! transfer on endpoint 0. The request codes are sequential starting at 51
//! and their order is part of the wire contract.

use crate::error::{ProtocolError, Result};
use crate::types::Direction;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// bmRequestType bits: vendor request type
pub const REQUEST_TYPE_VENDOR: u8 = 0x40;

/// bmRequestType bits: device recipient
pub const RECIPIENT_DEVICE: u8 = 0x00;

/// bmRequestType bits: device-to-host direction
pub const DIRECTION_IN: u8 = 0x80;

/// Length of the GetProtocol response payload
pub const PROTOCOL_VERSION_LEN: u16 = 2;

/// AOA request codes (bRequest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AoaRequest {
    GetProtocol = 51,
    SendStrings,
    StartAccessory,
    RegisterHid,
    UnregisterHid,
    SetHidReportDescriptor,
    SendHidEvent,
    SetAudioMode,
}

impl AoaRequest {
    /// All requests in wire order
    pub const ALL: [AoaRequest; 8] = [
        AoaRequest::GetProtocol,
        AoaRequest::SendStrings,
        AoaRequest::StartAccessory,
        AoaRequest::RegisterHid,
        AoaRequest::UnregisterHid,
        AoaRequest::SetHidReportDescriptor,
        AoaRequest::SendHidEvent,
        AoaRequest::SetAudioMode,
    ];

    /// The bRequest byte
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AoaRequest {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        AoaRequest::ALL
            .into_iter()
            .find(|request| request.code() == value)
            .ok_or(())
    }
}

impl fmt::Display for AoaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Audio mode values for [`AoaRequest::SetAudioMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum AudioMode {
    /// No audio output
    Disabled = 0,
    /// 2 channel, 16-bit PCM at 44100 Hz
    Source = 1,
}

impl From<AudioMode> for u16 {
    fn from(mode: AudioMode) -> Self {
        mode as u16
    }
}

/// Setup packet of an AOA control transfer
///
/// Recipient is always the device and the request type always vendor; only
/// the direction, request code, wValue and wIndex vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSetup {
    pub direction: Direction,
    pub request: AoaRequest,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    /// Host-to-device vendor request
    pub const fn vendor_out(request: AoaRequest, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::Out,
            request,
            value,
            index,
        }
    }

    /// Device-to-host vendor request
    pub const fn vendor_in(request: AoaRequest, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::In,
            request,
            value,
            index,
        }
    }

    /// The bmRequestType byte (`0x40` OUT, `0xC0` IN)
    pub const fn request_type(&self) -> u8 {
        let direction = match self.direction {
            Direction::In => DIRECTION_IN,
            Direction::Out => 0,
        };
        direction | REQUEST_TYPE_VENDOR | RECIPIENT_DEVICE
    }

    pub const fn get_protocol() -> Self {
        Self::vendor_in(AoaRequest::GetProtocol, 0, 0)
    }

    /// SendStrings for the string at `index` (see [`crate::AccessoryString`])
    pub const fn send_string(index: u16) -> Self {
        Self::vendor_out(AoaRequest::SendStrings, 0, index)
    }

    pub const fn start_accessory() -> Self {
        Self::vendor_out(AoaRequest::StartAccessory, 0, 0)
    }

    pub const fn set_audio_mode(mode: u16) -> Self {
        Self::vendor_out(AoaRequest::SetAudioMode, mode, 0)
    }

    /// RegisterHid announces the accessory id and the descriptor size
    pub const fn register_hid(accessory_id: u16, descriptor_len: u16) -> Self {
        Self::vendor_out(AoaRequest::RegisterHid, accessory_id, descriptor_len)
    }

    pub const fn unregister_hid(accessory_id: u16) -> Self {
        Self::vendor_out(AoaRequest::UnregisterHid, accessory_id, 0)
    }

    pub const fn set_hid_report_descriptor(accessory_id: u16) -> Self {
        Self::vendor_out(AoaRequest::SetHidReportDescriptor, accessory_id, 0)
    }

    pub const fn send_hid_event(accessory_id: u16) -> Self {
        Self::vendor_out(AoaRequest::SendHidEvent, accessory_id, 0)
    }
}

/// Decode the GetProtocol response
///
/// The payload is a little-endian u16. Version 0 means the device does not
/// support accessory mode.
pub fn decode_protocol_version(data: &[u8]) -> Result<u16> {
    let expected = PROTOCOL_VERSION_LEN as usize;
    if data.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected,
            actual: data.len(),
        });
    }
    Ok(LittleEndian::read_u16(&data[..expected]))
}

/// Checked conversion of a descriptor length to the RegisterHid wIndex
pub fn descriptor_len(descriptor: &[u8]) -> Result<u16> {
    u16::try_from(descriptor.len()).map_err(|_| ProtocolError::DescriptorTooLarge {
        size: descriptor.len(),
        max: u16::MAX as usize,
    })
}
