//! Accessory identification strings
//!
//! Before StartAccessory the host may identify itself with up to six strings,
//! each sent as its own SendStrings request with the string index in wIndex.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// String slots, in wire index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum AccessoryString {
    Manufacturer = 0,
    Model = 1,
    Description = 2,
    Version = 3,
    Uri = 4,
    Serial = 5,
}

impl AccessoryString {
    pub const ALL: [AccessoryString; 6] = [
        AccessoryString::Manufacturer,
        AccessoryString::Model,
        AccessoryString::Description,
        AccessoryString::Version,
        AccessoryString::Uri,
        AccessoryString::Serial,
    ];

    /// wIndex of this string
    pub const fn index(self) -> u16 {
        self as u16
    }
}

/// Encode a string payload: UTF-8 bytes followed by a NUL terminator
pub fn encode_string(value: &str) -> Result<Vec<u8>> {
    if value.contains('\0') {
        return Err(ProtocolError::InvalidString(value.to_string()));
    }
    let mut payload = Vec::with_capacity(value.len() + 1);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    Ok(payload)
}

/// Identification the host announces before switching to accessory mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryIdentity {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl AccessoryIdentity {
    /// Configured strings in index order, skipping unset slots
    pub fn strings(&self) -> Vec<(AccessoryString, &str)> {
        AccessoryString::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|value| (kind, value)))
            .collect()
    }

    pub fn get(&self, kind: AccessoryString) -> Option<&str> {
        let value = match kind {
            AccessoryString::Manufacturer => &self.manufacturer,
            AccessoryString::Model => &self.model,
            AccessoryString::Description => &self.description,
            AccessoryString::Version => &self.version,
            AccessoryString::Uri => &self.uri,
            AccessoryString::Serial => &self.serial,
        };
        value.as_deref()
    }
}
