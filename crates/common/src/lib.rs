//! Common utilities for aoa-bridge
//!
//! This crate provides functionality shared by the host library and the
//! command line tool: logging setup, error handling, USB device summaries,
//! and the async channel bridge between the Tokio runtime and the dedicated
//! USB worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{DeviceHandleId, OpenedDevice, UsbDeviceSummary};
