//! USB device summaries shared between the worker thread and its callers

use protocol::{ConfigurationInfo, DeviceFilter};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a device opened by the USB worker
///
/// Only valid until the device is closed or re-enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandleId(pub u32);

impl fmt::Display for DeviceHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an enumerated USB device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceSummary {
    pub bus_number: u8,
    pub device_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl UsbDeviceSummary {
    pub fn matches(&self, filters: &[DeviceFilter]) -> bool {
        protocol::matches_any(filters, self.vendor_id, self.product_id)
    }
}

impl fmt::Display for UsbDeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            self.bus_number, self.device_address, self.vendor_id, self.product_id
        )?;
        if let Some(manufacturer) = &self.manufacturer {
            write!(f, " {}", manufacturer)?;
        }
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// A device opened by the USB worker, with its descriptor snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedDevice {
    pub handle: DeviceHandleId,
    pub summary: UsbDeviceSummary,
    pub configurations: Vec<ConfigurationInfo>,
    pub active_configuration: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> UsbDeviceSummary {
        UsbDeviceSummary {
            bus_number: 1,
            device_address: 7,
            vendor_id: 0x18d1,
            product_id: 0x2d01,
            manufacturer: Some("Google".to_string()),
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn test_summary_display() {
        assert_eq!(
            summary().to_string(),
            "Bus 001 Device 007: ID 18d1:2d01 Google"
        );
    }

    #[test]
    fn test_summary_matches() {
        assert!(summary().matches(protocol::AOA_DEFAULT_DEVICE_FILTERS));
        assert!(!summary().matches(protocol::AOA_AUDIO_DEVICE_FILTERS));
    }
}
