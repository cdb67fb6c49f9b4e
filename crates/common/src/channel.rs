//! Async channel bridge between Tokio runtime and USB thread
//!
//! libusb calls block, so every device operation runs on a dedicated worker
//! thread. Callers on the Tokio side send a [`UsbCommand`] carrying a oneshot
//! sender and await the reply; the worker pushes hot-plug notifications back
//! as [`UsbEvent`]s.

use crate::usb_types::{DeviceHandleId, OpenedDevice, UsbDeviceSummary};
use async_channel::{Receiver, Sender, bounded};
use protocol::{ControlSetup, DeviceFilter, IsoPacket, UsbError};
use tokio::sync::oneshot;

/// Reply channel for a command
pub type Reply<T> = oneshot::Sender<Result<T, UsbError>>;

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List all connected USB devices
    ListDevices {
        response: oneshot::Sender<Vec<UsbDeviceSummary>>,
    },

    /// Open the first connected device matching any of `filters`
    OpenDevice {
        filters: Vec<DeviceFilter>,
        response: Reply<OpenedDevice>,
    },

    /// Release claimed interfaces and close the device
    CloseDevice {
        handle: DeviceHandleId,
        response: oneshot::Sender<()>,
    },

    /// Control transfer, device to host
    ControlIn {
        handle: DeviceHandleId,
        setup: ControlSetup,
        length: u16,
        response: Reply<Vec<u8>>,
    },

    /// Control transfer, host to device
    ControlOut {
        handle: DeviceHandleId,
        setup: ControlSetup,
        data: Vec<u8>,
        response: Reply<()>,
    },

    /// Set the active configuration
    SelectConfiguration {
        handle: DeviceHandleId,
        value: u8,
        response: Reply<()>,
    },

    /// Claim an interface
    ClaimInterface {
        handle: DeviceHandleId,
        interface: u8,
        response: Reply<()>,
    },

    /// Release a claimed interface
    ReleaseInterface {
        handle: DeviceHandleId,
        interface: u8,
        response: Reply<()>,
    },

    /// Select an alternate setting on a claimed interface
    SelectAlternate {
        handle: DeviceHandleId,
        interface: u8,
        alternate: u8,
        response: Reply<()>,
    },

    /// Isochronous IN transfer, one packet per entry of `packet_sizes`
    IsochronousIn {
        handle: DeviceHandleId,
        endpoint: u8,
        packet_sizes: Vec<u32>,
        response: Reply<Vec<IsoPacket>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// USB events from the worker thread
#[derive(Debug, Clone)]
pub enum UsbEvent {
    /// Device hot-plugged (connected)
    DeviceArrived { device: UsbDeviceSummary },

    /// Device removed
    DeviceLeft { bus_number: u8, device_address: u8 },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh reply channel and await the reply
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> UsbCommand,
    ) -> Result<T, UsbError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await.map_err(|e| UsbError::Other {
            message: e.to_string(),
        })?;
        rx.await.map_err(|_| UsbError::Other {
            message: "USB worker dropped the request".to_string(),
        })?
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Whether every [`UsbBridge`] has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, UsbCommand::ListDevices { .. })
        });

        let (tx, _rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(UsbCommand::ListDevices { response: tx })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            if let Ok(UsbCommand::ControlIn {
                setup, response, ..
            }) = worker.recv_command()
            {
                assert_eq!(setup, ControlSetup::get_protocol());
                let _ = response.send(Ok(vec![0x02, 0x00]));
            }
        });

        let data = bridge
            .request(|response| UsbCommand::ControlIn {
                handle: DeviceHandleId(1),
                setup: ControlSetup::get_protocol(),
                length: 2,
                response,
            })
            .await
            .unwrap();
        assert_eq!(data, vec![0x02, 0x00]);

        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_request_dropped_by_worker() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            // Drop the command, and with it the reply sender
            let _ = worker.recv_command();
        });

        let result = bridge
            .request(|response| UsbCommand::ClaimInterface {
                handle: DeviceHandleId(1),
                interface: 0,
                response,
            })
            .await;
        assert!(matches!(result, Err(UsbError::Other { .. })));

        handle.join().unwrap();
    }
}
