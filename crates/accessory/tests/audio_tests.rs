//! Integration tests for audio negotiation and capture
//!
//! Tests the negotiator and the pull loop against a mock device:
//! - Interface, alternate and endpoint selection
//! - Device state changes performed only when needed
//! - Chunk order, error propagation and termination
//! - Interface release on cancel, error and drop

use accessory::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockCall, MockDevice, alternate, audio_accessory_configuration,
    create_mock_audio_device, interface, iso_in_endpoint,
};
use accessory::{
    AccessoryError, AoaDevice, AudioCapture, AudioOptions, AudioSelection, UsbOperation,
    cancel_pair, start_accessory,
};
use futures::StreamExt;
use protocol::{
    ConfigurationInfo, Direction, EndpointInfo, EndpointKind, IsoPacket, USB_CLASS_AUDIO,
    USB_SUBCLASS_AUDIO_STREAMING, UsbError,
};
use std::sync::Arc;
use std::time::Duration;

fn device(mock: MockDevice) -> Arc<AoaDevice<MockDevice>> {
    Arc::new(AoaDevice::new(mock))
}

fn packets(payloads: &[&[u8]]) -> Vec<IsoPacket> {
    payloads.iter().map(|p| IsoPacket::new(p.to_vec())).collect()
}

#[tokio::test]
async fn test_negotiation_sequence() {
    let device = device(create_mock_audio_device());
    let capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    assert_eq!(
        capture.selection(),
        AudioSelection {
            configuration_value: 1,
            interface_number: 1,
            alternate_setting: 1,
            endpoint_number: 1,
        }
    );
    // Configuration 1 is already active, so it is not selected again
    assert_eq!(
        device.inner().calls(),
        vec![
            MockCall::ClaimInterface(1),
            MockCall::SelectAlternate {
                interface: 1,
                alternate: 1,
            },
        ]
    );
    assert_eq!(device.inner().claimed_interfaces(), vec![1]);
}

#[tokio::test]
async fn test_selects_configuration_when_unconfigured() {
    let device = device(
        MockDevice::new()
            .with_configurations(vec![audio_accessory_configuration(1)])
            .with_active_configuration(None),
    );
    AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    assert_eq!(device.inner().calls()[0], MockCall::SelectConfiguration(1));
}

#[tokio::test]
async fn test_ignores_unrelated_alternates() {
    let configuration = ConfigurationInfo {
        value: 1,
        interfaces: vec![
            interface(
                0,
                vec![alternate(
                    0,
                    0x03,
                    0x00,
                    vec![EndpointInfo {
                        number: 3,
                        direction: Direction::In,
                        kind: EndpointKind::Interrupt,
                        max_packet_size: 8,
                    }],
                )],
            ),
            interface(
                1,
                vec![alternate(
                    0,
                    USB_CLASS_AUDIO,
                    USB_SUBCLASS_AUDIO_STREAMING,
                    vec![iso_in_endpoint(4)],
                )],
            ),
        ],
    };
    let device = device(
        MockDevice::new()
            .with_configurations(vec![configuration])
            .with_active_configuration(Some(1)),
    );
    let capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    assert_eq!(capture.selection().interface_number, 1);
    assert_eq!(capture.selection().endpoint_number, 4);
    // Alternate 0 is already active
    assert_eq!(device.inner().calls(), vec![MockCall::ClaimInterface(1)]);
}

#[tokio::test]
async fn test_no_matching_interface_claims_nothing() {
    let configuration = ConfigurationInfo {
        value: 1,
        interfaces: vec![
            interface(0, vec![alternate(0, USB_CLASS_AUDIO, 0x01, Vec::new())]),
            interface(1, vec![alternate(0, 0xff, 0xff, vec![iso_in_endpoint(1)])]),
        ],
    };
    let device = device(
        MockDevice::new()
            .with_configurations(vec![configuration])
            .with_active_configuration(Some(1)),
    );

    let result = AudioCapture::open(device.clone(), AudioOptions::default()).await;
    assert!(matches!(result, Err(AccessoryError::NoMatchingInterface)));
    assert!(device.inner().calls().is_empty());
}

#[tokio::test]
async fn test_no_matching_endpoint_releases_interface() {
    let bulk_only = EndpointInfo {
        number: 2,
        direction: Direction::In,
        kind: EndpointKind::Bulk,
        max_packet_size: 512,
    };
    let configuration = ConfigurationInfo {
        value: 1,
        interfaces: vec![interface(
            0,
            vec![alternate(
                0,
                USB_CLASS_AUDIO,
                USB_SUBCLASS_AUDIO_STREAMING,
                vec![bulk_only],
            )],
        )],
    };
    let device = device(
        MockDevice::new()
            .with_configurations(vec![configuration])
            .with_active_configuration(Some(1)),
    );

    let result = AudioCapture::open(device.clone(), AudioOptions::default()).await;
    assert!(matches!(
        result,
        Err(AccessoryError::NoMatchingEndpoint {
            interface: 0,
            alternate: 0
        })
    ));
    assert_eq!(
        device.inner().calls(),
        vec![MockCall::ClaimInterface(0), MockCall::ReleaseInterface(0)]
    );
}

#[tokio::test]
async fn test_claim_failure_is_reported() {
    let device = device(create_mock_audio_device().fail_claim(1, UsbError::Busy));

    match AudioCapture::open(device.clone(), AudioOptions::default()).await {
        Err(AccessoryError::TransferRejected { operation, source }) => {
            assert_eq!(operation, UsbOperation::ClaimInterface(1));
            assert_eq!(source, UsbError::Busy);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("claim failure was not reported"),
    }
}

#[tokio::test]
async fn test_chunks_then_error_then_end() {
    let device = device(
        create_mock_audio_device()
            .push_iso(Ok(packets(&[b"AAAA", b"BB"])))
            .push_iso(Err(UsbError::Pipe)),
    );
    let mut capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    assert_eq!(capture.next_chunk().await.unwrap().unwrap(), &b"AAAA"[..]);
    assert_eq!(capture.next_chunk().await.unwrap().unwrap(), &b"BB"[..]);
    match capture.next_chunk().await {
        Some(Err(AccessoryError::TransferRejected { operation, source })) => {
            assert_eq!(operation, UsbOperation::IsochronousIn { endpoint: 1 });
            assert_eq!(source, UsbError::Pipe);
        }
        other => panic!("expected transfer error, got {:?}", other),
    }
    assert!(capture.next_chunk().await.is_none());
    assert!(capture.next_chunk().await.is_none());

    let transfers = device
        .inner()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::IsochronousIn { .. }))
        .count();
    assert_eq!(transfers, 2);
    assert!(device.inner().claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_stream_over_separate_transfers() {
    let device = device(
        create_mock_audio_device()
            .push_iso(Ok(packets(&[b"AAAA"])))
            .push_iso(Ok(packets(&[b"BB"])))
            .push_iso(Err(UsbError::NoDevice)),
    );
    let capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    let items: Vec<_> = capture.into_stream().collect().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &b"AAAA"[..]);
    assert_eq!(items[1].as_ref().unwrap(), &b"BB"[..]);
    assert!(items[2].is_err());
    assert!(device.inner().claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_transfer_uses_configured_packet_sizes() {
    let device = device(create_mock_audio_device().push_iso(Ok(packets(&[b"x"]))));
    let options = AudioOptions {
        packet_size: 192,
        packets_per_transfer: 2,
    };
    let mut capture = AudioCapture::open(device.clone(), options).await.unwrap();
    capture.next_chunk().await.unwrap().unwrap();

    assert!(device.inner().calls().contains(&MockCall::IsochronousIn {
        endpoint: 1,
        packet_sizes: vec![192, 192],
    }));
}

#[tokio::test]
async fn test_pull_driven() {
    let device = device(create_mock_audio_device().push_iso(Ok(packets(&[b"AAAA"]))));
    let _capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(
        !device
            .inner()
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::IsochronousIn { .. }))
    );
}

#[tokio::test]
async fn test_cancel_releases_interface() {
    // No scripted packets: the transfer never completes
    let device = device(create_mock_audio_device());
    let (cancel, token) = cancel_pair();
    let mut capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap()
        .with_cancel(token);

    let pull = tokio::spawn(async move { capture.next_chunk().await.is_none() });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let ended = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, pull)
        .await
        .unwrap()
        .unwrap();
    assert!(ended);
    assert_eq!(device.inner().calls().last(), Some(&MockCall::ReleaseInterface(1)));
    assert!(device.inner().claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_cancel_before_first_pull() {
    let device = device(create_mock_audio_device().push_iso(Ok(packets(&[b"AAAA"]))));
    let (cancel, token) = cancel_pair();
    let mut capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap()
        .with_cancel(token);

    cancel.cancel();
    assert!(capture.next_chunk().await.is_none());
    assert!(
        !device
            .inner()
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::IsochronousIn { .. }))
    );
}

#[tokio::test]
async fn test_preclaimed_interface_is_left_claimed() {
    let mut configuration = audio_accessory_configuration(1);
    configuration.interfaces[1].claimed = true;
    configuration.interfaces[1].active_alternate = 1;
    let device = device(
        MockDevice::new()
            .with_configurations(vec![configuration])
            .with_active_configuration(Some(1))
            .push_iso(Err(UsbError::Pipe)),
    );

    let mut capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();
    assert!(matches!(capture.next_chunk().await, Some(Err(_))));
    assert!(capture.next_chunk().await.is_none());

    assert!(
        !device
            .inner()
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::ClaimInterface(_) | MockCall::ReleaseInterface(_)))
    );
    assert_eq!(device.inner().claimed_interfaces(), vec![1]);
}

#[tokio::test]
async fn test_close_releases_interface() {
    let device = device(create_mock_audio_device());
    let capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    capture.close().await.unwrap();
    assert!(device.inner().claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_drop_releases_interface() {
    let device = device(create_mock_audio_device());
    let capture = AudioCapture::open(device.clone(), AudioOptions::default())
        .await
        .unwrap();

    drop(capture);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(device.inner().claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_open_on_stale_handle() {
    let device = device(create_mock_audio_device());
    start_accessory(&device).await.unwrap();

    let result = AudioCapture::open(device.clone(), AudioOptions::default()).await;
    assert!(matches!(result, Err(AccessoryError::DeviceReenumerated)));
    assert!(
        !device
            .inner()
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::ClaimInterface(_)))
    );
}
