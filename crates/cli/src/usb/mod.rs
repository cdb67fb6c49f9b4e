//! USB subsystem
//!
//! libusb calls block, so all device access runs on a dedicated worker thread
//! (see [`worker`]) that owns the libusb context. The Tokio side talks to it
//! through the [`common::UsbBridge`], and [`RemoteDevice`] adapts that bridge
//! to the accessory layer's [`accessory::UsbDevice`] boundary.

pub mod device;
pub mod manager;
pub mod remote;
#[cfg(test)]
pub mod test_worker;
pub mod transfers;
pub mod worker;

pub use remote::RemoteDevice;
pub use worker::spawn_usb_worker;
