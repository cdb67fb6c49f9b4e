//! Android Open Accessory host side
//!
//! Drives an accessory-capable device through a [`UsbDevice`] supplied by the
//! host USB layer:
//!
//! - [`control`]: protocol version query, identification strings, audio mode
//!   and the switch into accessory mode
//! - [`hid`]: virtual HID devices registered on the accessory
//! - [`audio`]: negotiation of the USB Audio streaming interface and a
//!   pull-driven capture of its isochronous samples

pub mod audio;
pub mod control;
pub mod device;
pub mod error;
pub mod hid;
pub mod test_utils;

pub use audio::{
    AudioCapture, AudioOptions, AudioSelection, CancelHandle, CancelToken, DEFAULT_PACKET_SIZE,
    cancel_pair, find_audio_streaming_interface, find_iso_in_endpoint,
};
pub use control::{
    get_protocol_version, is_accessory_capable, send_identification, send_string,
    set_audio_mode, start_accessory,
};
pub use device::{AoaDevice, UsbDevice, UsbResult};
pub use error::{AccessoryError, Result, UsbOperation};
pub use hid::HidAccessory;
