//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
///
/// These are raised while encoding or decoding AOA payloads, before or after
/// any bytes reach the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Device answered a control IN request with fewer bytes than required
    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// HID report descriptor cannot be announced in a 16-bit wIndex
    #[error("HID report descriptor too large: {size} bytes (max: {max})")]
    DescriptorTooLarge { size: usize, max: usize },

    /// Accessory strings are sent NUL-terminated and cannot contain NUL
    #[error("Invalid accessory string: {0:?} contains a NUL byte")]
    InvalidString(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
