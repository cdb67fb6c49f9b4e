//! Scripted stand-in for the libusb worker thread
//!
//! Answers bridge commands the way a cooperative audio-capable accessory
//! would, and records each command it served.

use accessory::test_utils::audio_accessory_configuration;
use common::{DeviceHandleId, OpenedDevice, UsbCommand, UsbDeviceSummary, UsbWorker};
use protocol::{IsoPacket, UsbError};
use std::collections::VecDeque;
use std::thread::JoinHandle;

/// Spawn a worker that replies to isochronous reads from `iso_replies` in
/// order, then with `NoDevice` once the script runs out
pub fn spawn_fake_worker(
    worker: UsbWorker,
    iso_replies: Vec<Result<Vec<IsoPacket>, UsbError>>,
) -> JoinHandle<Vec<String>> {
    let mut iso_replies = VecDeque::from(iso_replies);
    std::thread::spawn(move || {
        let mut seen = Vec::new();
        while let Ok(cmd) = worker.recv_command() {
            match cmd {
                UsbCommand::OpenDevice { response, .. } => {
                    seen.push("open".to_string());
                    let _ = response.send(Ok(OpenedDevice {
                        handle: DeviceHandleId(1),
                        summary: UsbDeviceSummary {
                            bus_number: 1,
                            device_address: 4,
                            vendor_id: 0x18d1,
                            product_id: 0x2d02,
                            manufacturer: None,
                            product: None,
                            serial_number: None,
                        },
                        configurations: vec![audio_accessory_configuration(1)],
                        active_configuration: Some(1),
                    }));
                }
                UsbCommand::ClaimInterface {
                    interface,
                    response,
                    ..
                } => {
                    seen.push(format!("claim {}", interface));
                    let _ = response.send(Ok(()));
                }
                UsbCommand::SelectAlternate {
                    interface,
                    alternate,
                    response,
                    ..
                } => {
                    seen.push(format!("alt {} {}", interface, alternate));
                    let _ = response.send(Ok(()));
                }
                UsbCommand::ReleaseInterface {
                    interface,
                    response,
                    ..
                } => {
                    seen.push(format!("release {}", interface));
                    let _ = response.send(Ok(()));
                }
                UsbCommand::IsochronousIn { response, .. } => {
                    seen.push("iso".to_string());
                    let reply = iso_replies.pop_front().unwrap_or(Err(UsbError::NoDevice));
                    let _ = response.send(reply);
                }
                UsbCommand::CloseDevice { response, .. } => {
                    seen.push("close".to_string());
                    let _ = response.send(());
                }
                UsbCommand::Shutdown => break,
                other => panic!("unexpected command: {:?}", other),
            }
        }
        seen
    })
}
