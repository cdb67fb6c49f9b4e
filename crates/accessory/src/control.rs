//! Accessory mode handshake
//!
//! Each function here is one AOA control transfer (or, for
//! [`send_identification`], one per configured string).

use crate::device::{AoaDevice, UsbDevice};
use crate::error::Result;
use protocol::{
    AccessoryIdentity, AccessoryString, ControlSetup, PROTOCOL_VERSION_LEN,
    decode_protocol_version, encode_string,
};
use tracing::{debug, info};

/// Query the highest AOA protocol version the device supports
///
/// 0 means the device is not accessory capable.
pub async fn get_protocol_version<D: UsbDevice>(device: &AoaDevice<D>) -> Result<u16> {
    let data = device
        .control_in(ControlSetup::get_protocol(), PROTOCOL_VERSION_LEN)
        .await?;
    let version = decode_protocol_version(&data)?;
    debug!("Device reports AOA protocol version {}", version);
    Ok(version)
}

/// Whether the device answers GetProtocol with a non-zero version
///
/// A rejected transfer counts as "not capable".
pub async fn is_accessory_capable<D: UsbDevice>(device: &AoaDevice<D>) -> bool {
    matches!(get_protocol_version(device).await, Ok(version) if version > 0)
}

/// Send one identification string
pub async fn send_string<D: UsbDevice>(
    device: &AoaDevice<D>,
    kind: AccessoryString,
    value: &str,
) -> Result<()> {
    let payload = encode_string(value)?;
    device
        .control_out(ControlSetup::send_string(kind.index()), &payload)
        .await
}

/// Send every configured identification string in index order
pub async fn send_identification<D: UsbDevice>(
    device: &AoaDevice<D>,
    identity: &AccessoryIdentity,
) -> Result<()> {
    for (kind, value) in identity.strings() {
        debug!("Sending accessory string {:?} = {:?}", kind, value);
        send_string(device, kind, value).await?;
    }
    Ok(())
}

/// Switch the device into accessory mode
///
/// The device re-enumerates with an accessory product id; the caller must
/// find it again (see [`protocol::AOA_DEFAULT_DEVICE_FILTERS`]). This handle
/// is stale afterwards.
pub async fn start_accessory<D: UsbDevice>(device: &AoaDevice<D>) -> Result<()> {
    device
        .control_out(ControlSetup::start_accessory(), &[])
        .await?;
    device.mark_reenumerated();
    info!("Device switching to accessory mode");
    Ok(())
}

/// Set the audio mode
///
/// Must precede StartAccessory for the device to expose its audio interface.
pub async fn set_audio_mode<D: UsbDevice>(device: &AoaDevice<D>, mode: u16) -> Result<()> {
    device
        .control_out(ControlSetup::set_audio_mode(mode), &[])
        .await?;
    info!("Audio mode set to {}", mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessoryError;
    use crate::test_utils::{MockCall, MockDevice};
    use protocol::{AoaRequest, AudioMode, UsbError};

    #[tokio::test]
    async fn test_get_protocol_version() {
        let device = AoaDevice::new(MockDevice::new().with_control_in(vec![0x02, 0x00]));
        assert_eq!(get_protocol_version(&device).await.unwrap(), 2);

        assert_eq!(
            device.inner().calls(),
            vec![MockCall::ControlIn {
                setup: ControlSetup::get_protocol(),
                length: 2,
            }]
        );
    }

    #[tokio::test]
    async fn test_short_version_response() {
        let device = AoaDevice::new(MockDevice::new().with_control_in(vec![0x02]));
        assert!(matches!(
            get_protocol_version(&device).await,
            Err(AccessoryError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_capability_check() {
        let device = AoaDevice::new(MockDevice::new().with_control_in(vec![0x00, 0x00]));
        assert!(!is_accessory_capable(&device).await);

        let device = AoaDevice::new(
            MockDevice::new().fail_request(AoaRequest::GetProtocol, UsbError::Pipe),
        );
        assert!(!is_accessory_capable(&device).await);

        let device = AoaDevice::new(MockDevice::new().with_control_in(vec![0x01, 0x00]));
        assert!(is_accessory_capable(&device).await);
    }

    #[tokio::test]
    async fn test_start_accessory_marks_handle_stale() {
        let device = AoaDevice::new(MockDevice::new());
        start_accessory(&device).await.unwrap();
        assert!(device.is_reenumerated());

        let result = set_audio_mode(&device, AudioMode::Source.into()).await;
        assert!(matches!(result, Err(AccessoryError::DeviceReenumerated)));
        assert_eq!(device.inner().control_requests(), vec![AoaRequest::StartAccessory]);
    }

    #[tokio::test]
    async fn test_failed_start_keeps_handle() {
        let device = AoaDevice::new(
            MockDevice::new().fail_request(AoaRequest::StartAccessory, UsbError::Pipe),
        );
        assert!(start_accessory(&device).await.is_err());
        assert!(!device.is_reenumerated());
    }

    #[tokio::test]
    async fn test_set_audio_mode() {
        let device = AoaDevice::new(MockDevice::new());
        set_audio_mode(&device, 1).await.unwrap();
        assert_eq!(
            device.inner().calls(),
            vec![MockCall::ControlOut {
                setup: ControlSetup::set_audio_mode(1),
                data: Vec::new(),
            }]
        );
    }

    #[tokio::test]
    async fn test_send_identification() {
        let device = AoaDevice::new(MockDevice::new());
        let identity = AccessoryIdentity {
            manufacturer: Some("Acme".to_string()),
            version: Some("1.0".to_string()),
            ..Default::default()
        };
        send_identification(&device, &identity).await.unwrap();

        assert_eq!(
            device.inner().calls(),
            vec![
                MockCall::ControlOut {
                    setup: ControlSetup::send_string(0),
                    data: b"Acme\0".to_vec(),
                },
                MockCall::ControlOut {
                    setup: ControlSetup::send_string(3),
                    data: b"1.0\0".to_vec(),
                },
            ]
        );
    }
}
