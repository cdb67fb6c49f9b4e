//! USB worker thread
//!
//! Dedicated thread owning the libusb context. Executes [`UsbCommand`]s sent
//! from the Tokio runtime and runs the libusb event loop so hot-plug
//! callbacks fire.

use crate::usb::manager::DeviceManager;
use crate::usb::transfers::{control_in, control_out, isochronous_in};
use common::{UsbCommand, UsbWorker};
use rusb::UsbContext;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one libusb event-loop pass may block before commands are polled
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// USB worker thread
pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: UsbWorker,
    /// Timeout applied to each control transfer
    timeout: Duration,
}

impl UsbWorkerThread {
    pub fn new(worker: UsbWorker, timeout: Duration) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(worker.event_tx.clone())?;
        manager.initialize()?;

        Ok(Self {
            manager,
            worker,
            timeout,
        })
    }

    /// Run until a Shutdown command arrives or the bridge is dropped
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            while let Some(cmd) = self.worker.try_recv_command() {
                if let UsbCommand::Shutdown = cmd {
                    info!("USB worker shutting down");
                    self.manager.close_all();
                    info!("USB worker thread stopped");
                    return Ok(());
                }
                self.handle_command(cmd);
            }

            if self.worker.is_disconnected() {
                info!("USB bridge dropped, stopping worker");
                break;
            }

            match self
                .manager
                .context()
                .handle_events(Some(EVENT_POLL_INTERVAL))
            {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_POLL_INTERVAL);
                }
            }
        }

        self.manager.close_all();
        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // A panicking command must not take the USB thread down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        let timeout = self.timeout;

        match cmd {
            UsbCommand::ListDevices { response } => {
                let devices = self.manager.list_devices();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            UsbCommand::OpenDevice { filters, response } => {
                let _ = response.send(self.manager.open_device(&filters));
            }

            UsbCommand::CloseDevice { handle, response } => {
                self.manager.close_device(handle);
                let _ = response.send(());
            }

            UsbCommand::ControlIn {
                handle,
                setup,
                length,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| control_in(device.handle(), setup, length, timeout));
                let _ = response.send(result);
            }

            UsbCommand::ControlOut {
                handle,
                setup,
                data,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| control_out(device.handle(), setup, &data, timeout));
                let _ = response.send(result);
            }

            UsbCommand::SelectConfiguration {
                handle,
                value,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| device.select_configuration(value));
                let _ = response.send(result);
            }

            UsbCommand::ClaimInterface {
                handle,
                interface,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| device.claim_interface(interface));
                let _ = response.send(result);
            }

            UsbCommand::ReleaseInterface {
                handle,
                interface,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| device.release_interface(interface));
                let _ = response.send(result);
            }

            UsbCommand::SelectAlternate {
                handle,
                interface,
                alternate,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| device.select_alternate(interface, alternate));
                let _ = response.send(result);
            }

            UsbCommand::IsochronousIn {
                handle,
                endpoint,
                packet_sizes,
                response,
            } => {
                let result = self
                    .manager
                    .get_device(handle)
                    .and_then(|device| {
                        isochronous_in(device.handle(), endpoint, &packet_sizes, timeout)
                    });
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Handled in the run loop
            }
        }
    }
}

/// Spawn the USB worker thread
pub fn spawn_usb_worker(
    worker: UsbWorker,
    timeout: Duration,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, timeout)?;
            worker_thread.run()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_usb_bridge();

        // USB context creation may fail without permissions
        if let Err(e) = UsbWorkerThread::new(worker, Duration::from_secs(1)) {
            eprintln!("USB worker creation failed (expected without permissions): {}", e);
        }
    }

    #[test]
    fn test_worker_stops_on_shutdown() {
        let (bridge, worker) = create_usb_bridge();
        let Ok(worker_thread) = UsbWorkerThread::new(worker, Duration::from_secs(1)) else {
            return;
        };

        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(bridge.send_command(UsbCommand::Shutdown))
            .unwrap();

        // The queued Shutdown ends the loop on its first pass
        assert!(worker_thread.run().is_ok());
    }
}
