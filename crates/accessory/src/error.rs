//! Accessory error types

use protocol::{AoaRequest, ProtocolError, UsbError};
use std::fmt;
use thiserror::Error;

/// The device operation a [`AccessoryError::TransferRejected`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbOperation {
    Control(AoaRequest),
    SelectConfiguration(u8),
    ClaimInterface(u8),
    ReleaseInterface(u8),
    SelectAlternate { interface: u8, alternate: u8 },
    IsochronousIn { endpoint: u8 },
}

impl fmt::Display for UsbOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbOperation::Control(request) => write!(f, "control request {}", request),
            UsbOperation::SelectConfiguration(value) => {
                write!(f, "select configuration {}", value)
            }
            UsbOperation::ClaimInterface(interface) => write!(f, "claim interface {}", interface),
            UsbOperation::ReleaseInterface(interface) => {
                write!(f, "release interface {}", interface)
            }
            UsbOperation::SelectAlternate {
                interface,
                alternate,
            } => write!(f, "select alternate {} on interface {}", alternate, interface),
            UsbOperation::IsochronousIn { endpoint } => {
                write!(f, "isochronous IN on endpoint {}", endpoint)
            }
        }
    }
}

/// Errors surfaced by accessory operations
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum AccessoryError {
    /// The device or host stack refused a transfer
    #[error("{operation} rejected")]
    TransferRejected {
        operation: UsbOperation,
        #[source]
        source: UsbError,
    },

    /// No Audio/AudioStreaming alternate with endpoints
    #[error("No matching audio streaming interface found")]
    NoMatchingInterface,

    /// The selected alternate has no isochronous IN endpoint
    #[error("No isochronous IN endpoint on interface {interface} alternate {alternate}")]
    NoMatchingEndpoint { interface: u8, alternate: u8 },

    /// Session used outside the Registered state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(&'static str),

    /// The handle was switched into accessory mode and is stale
    #[error("Device re-enumerated in accessory mode, handle is stale")]
    DeviceReenumerated,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl AccessoryError {
    pub(crate) fn rejected(operation: UsbOperation) -> impl FnOnce(UsbError) -> Self {
        move |source| AccessoryError::TransferRejected { operation, source }
    }
}

/// Type alias for accessory results
pub type Result<T> = std::result::Result<T, AccessoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_rejected_display() {
        let err = AccessoryError::TransferRejected {
            operation: UsbOperation::Control(AoaRequest::RegisterHid),
            source: UsbError::Pipe,
        };
        assert_eq!(err.to_string(), "control request RegisterHid(54) rejected");

        // The cause is reported once, through the source chain
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("endpoint stalled"));
    }

    #[test]
    fn test_operation_display() {
        let op = UsbOperation::SelectAlternate {
            interface: 2,
            alternate: 1,
        };
        assert_eq!(op.to_string(), "select alternate 1 on interface 2");
    }
}
