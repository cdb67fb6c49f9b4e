//! Device filter table
//!
//! Vendor/product pairs a host device picker uses to find a device that has
//! re-enumerated in accessory mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Google's vendor id, used by every accessory-mode device
pub const AOA_VENDOR_ID: u16 = 0x18d1;

/// Vendor/product match criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceFilter {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceFilter {
    type Err = String;

    /// Parse `VID:PID` in hex, with or without a `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid device filter '{}': expected VID:PID", s))?;

        let parse = |part: &str| {
            let digits = part
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            u16::from_str_radix(digits, 16)
                .map_err(|_| format!("Invalid hex id '{}' in device filter '{}'", part, s))
        };

        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Accessory, and accessory + ADB
pub const AOA_DEFAULT_DEVICE_FILTERS: &[DeviceFilter] = &[
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d00),
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d01),
];

/// Audio, audio + ADB, accessory + audio, accessory + audio + ADB
pub const AOA_AUDIO_DEVICE_FILTERS: &[DeviceFilter] = &[
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d02),
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d03),
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d04),
    DeviceFilter::new(AOA_VENDOR_ID, 0x2d05),
];

/// Whether any filter in `filters` matches
pub fn matches_any(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.iter().any(|f| f.matches(vendor_id, product_id))
}
