//! Android Open Accessory wire protocol
//!
//! This crate defines the byte-level contract between a USB host and an
//! accessory-capable device: the vendor control requests, the HID mouse
//! report descriptor and report layout, the identification strings, and the
//! vendor/product table used to recognise a device once it is in accessory
//! mode. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{AoaRequest, ControlSetup, HidMouse, decode_protocol_version};
//!
//! let setup = ControlSetup::register_hid(1, HidMouse::DESCRIPTOR.len() as u16);
//! assert_eq!(setup.request, AoaRequest::RegisterHid);
//! assert_eq!(setup.request_type(), 0x40);
//!
//! assert_eq!(decode_protocol_version(&[0x02, 0x00]).unwrap(), 2);
//! ```

pub mod error;
pub mod filter;
pub mod hid;
pub mod request;
pub mod strings;
pub mod types;

pub use error::{ProtocolError, Result};
pub use filter::{
    AOA_AUDIO_DEVICE_FILTERS, AOA_DEFAULT_DEVICE_FILTERS, AOA_VENDOR_ID, DeviceFilter,
    matches_any,
};
pub use hid::{
    HidMouse, MOUSE_REPORT_SIZE, MouseButtons, MouseReport, mouse_descriptor,
    serialize_mouse_report,
};
pub use request::{
    AoaRequest, AudioMode, ControlSetup, PROTOCOL_VERSION_LEN, decode_protocol_version,
    descriptor_len,
};
pub use strings::{AccessoryIdentity, AccessoryString, encode_string};
pub use types::{
    AlternateInfo, ConfigurationInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo,
    IsoPacket, USB_CLASS_AUDIO, USB_SUBCLASS_AUDIO_STREAMING, UsbError,
};
