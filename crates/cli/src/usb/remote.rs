//! [`UsbDevice`] backed by the USB worker thread
//!
//! Every call is forwarded over the [`UsbBridge`] and awaited. The descriptor
//! snapshot taken at open time is kept here and updated as configuration,
//! claim and alternate changes succeed, so the synchronous snapshot accessors
//! never round-trip to the worker.

use accessory::{UsbDevice, UsbResult};
use async_trait::async_trait;
use common::{DeviceHandleId, OpenedDevice, UsbBridge, UsbCommand, UsbDeviceSummary};
use protocol::{ConfigurationInfo, ControlSetup, DeviceFilter, IsoPacket};
use std::sync::Mutex;
use tracing::debug;

struct Snapshot {
    configurations: Vec<ConfigurationInfo>,
    active_configuration: Option<u8>,
}

/// A device opened through the USB worker
pub struct RemoteDevice {
    bridge: UsbBridge,
    handle: DeviceHandleId,
    summary: UsbDeviceSummary,
    snapshot: Mutex<Snapshot>,
}

impl RemoteDevice {
    /// Open the first connected device matching any of `filters`
    pub async fn open(bridge: UsbBridge, filters: Vec<DeviceFilter>) -> UsbResult<Self> {
        let opened: OpenedDevice = bridge
            .request(|response| UsbCommand::OpenDevice { filters, response })
            .await?;

        Ok(Self {
            bridge,
            handle: opened.handle,
            summary: opened.summary,
            snapshot: Mutex::new(Snapshot {
                configurations: opened.configurations,
                active_configuration: opened.active_configuration,
            }),
        })
    }

    pub fn summary(&self) -> &UsbDeviceSummary {
        &self.summary
    }

    /// Release claimed interfaces and close the handle on the worker
    pub async fn close(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let sent = self
            .bridge
            .send_command(UsbCommand::CloseDevice {
                handle: self.handle,
                response: tx,
            })
            .await;
        if sent.is_ok() {
            let _ = rx.await;
        }
        debug!("Closed {}", self.summary);
    }

    fn snapshot(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_interface(&self, interface: u8, update: impl Fn(&mut protocol::InterfaceInfo)) {
        let mut snapshot = self.snapshot();
        let active = snapshot.active_configuration;
        snapshot
            .configurations
            .iter_mut()
            .filter(|c| Some(c.value) == active)
            .flat_map(|c| c.interfaces.iter_mut())
            .filter(|i| i.number == interface)
            .for_each(update);
    }
}

#[async_trait]
impl UsbDevice for RemoteDevice {
    async fn control_transfer_out(&self, setup: ControlSetup, data: &[u8]) -> UsbResult<()> {
        let handle = self.handle;
        let data = data.to_vec();
        self.bridge
            .request(|response| UsbCommand::ControlOut {
                handle,
                setup,
                data,
                response,
            })
            .await
    }

    async fn control_transfer_in(&self, setup: ControlSetup, length: u16) -> UsbResult<Vec<u8>> {
        let handle = self.handle;
        self.bridge
            .request(|response| UsbCommand::ControlIn {
                handle,
                setup,
                length,
                response,
            })
            .await
    }

    fn configurations(&self) -> Vec<ConfigurationInfo> {
        self.snapshot().configurations.clone()
    }

    fn active_configuration(&self) -> Option<u8> {
        self.snapshot().active_configuration
    }

    async fn select_configuration(&self, value: u8) -> UsbResult<()> {
        let handle = self.handle;
        self.bridge
            .request(|response| UsbCommand::SelectConfiguration {
                handle,
                value,
                response,
            })
            .await?;

        let mut snapshot = self.snapshot();
        snapshot.active_configuration = Some(value);
        for interface in snapshot
            .configurations
            .iter_mut()
            .flat_map(|c| c.interfaces.iter_mut())
        {
            interface.claimed = false;
            interface.active_alternate = 0;
        }
        Ok(())
    }

    async fn claim_interface(&self, interface: u8) -> UsbResult<()> {
        let handle = self.handle;
        self.bridge
            .request(|response| UsbCommand::ClaimInterface {
                handle,
                interface,
                response,
            })
            .await?;
        self.update_interface(interface, |i| i.claimed = true);
        Ok(())
    }

    async fn release_interface(&self, interface: u8) -> UsbResult<()> {
        let handle = self.handle;
        self.bridge
            .request(|response| UsbCommand::ReleaseInterface {
                handle,
                interface,
                response,
            })
            .await?;
        self.update_interface(interface, |i| {
            i.claimed = false;
            i.active_alternate = 0;
        });
        Ok(())
    }

    async fn select_alternate_interface(&self, interface: u8, alternate: u8) -> UsbResult<()> {
        let handle = self.handle;
        self.bridge
            .request(|response| UsbCommand::SelectAlternate {
                handle,
                interface,
                alternate,
                response,
            })
            .await?;
        self.update_interface(interface, |i| i.active_alternate = alternate);
        Ok(())
    }

    async fn isochronous_transfer_in(
        &self,
        endpoint: u8,
        packet_sizes: &[u32],
    ) -> UsbResult<Vec<IsoPacket>> {
        let handle = self.handle;
        let packet_sizes = packet_sizes.to_vec();
        self.bridge
            .request(|response| UsbCommand::IsochronousIn {
                handle,
                endpoint,
                packet_sizes,
                response,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::test_worker::spawn_fake_worker;
    use accessory::{AoaDevice, AudioCapture, AudioOptions};
    use common::create_usb_bridge;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_snapshot_tracks_changes() {
        let (bridge, worker) = create_usb_bridge();
        let thread = spawn_fake_worker(worker, Vec::new());

        let device = RemoteDevice::open(bridge.clone(), vec![DeviceFilter::new(0x18d1, 0x2d02)])
            .await
            .unwrap();
        assert_eq!(device.summary().product_id, 0x2d02);

        device.claim_interface(1).await.unwrap();
        device.select_alternate_interface(1, 1).await.unwrap();
        let interface = &device.configurations()[0].interfaces[1];
        assert!(interface.claimed);
        assert_eq!(interface.active_alternate, 1);

        device.release_interface(1).await.unwrap();
        let interface = &device.configurations()[0].interfaces[1];
        assert!(!interface.claimed);

        bridge.send_command(UsbCommand::Shutdown).await.unwrap();
        assert_eq!(
            thread.join().unwrap(),
            vec!["open", "claim 1", "alt 1 1", "release 1"]
        );
    }

    #[tokio::test]
    async fn test_audio_negotiation_through_bridge() {
        let (bridge, worker) = create_usb_bridge();
        let thread = spawn_fake_worker(worker, Vec::new());

        let device = RemoteDevice::open(bridge.clone(), vec![DeviceFilter::new(0x18d1, 0x2d02)])
            .await
            .unwrap();
        let device = Arc::new(AoaDevice::new(device));
        let capture = AudioCapture::open(device, AudioOptions::default())
            .await
            .unwrap();
        assert_eq!(capture.selection().endpoint_number, 1);
        capture.close().await.unwrap();

        bridge.send_command(UsbCommand::Shutdown).await.unwrap();
        assert_eq!(
            thread.join().unwrap(),
            vec!["open", "claim 1", "alt 1 1", "release 1"]
        );
    }
}
