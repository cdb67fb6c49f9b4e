//! USB device manager
//!
//! Enumerates devices, opens the ones the accessory layer asks for, and
//! forwards hot-plug notifications. Runs on the USB thread.

use crate::usb::device::{HostDevice, device_summary};
use crate::usb::transfers::map_rusb_error;
use common::{DeviceHandleId, OpenedDevice, UsbDeviceSummary, UsbEvent};
use protocol::{DeviceFilter, UsbError, matches_any};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// USB device manager
pub struct DeviceManager {
    context: Context,
    /// Devices opened on behalf of callers
    opened: HashMap<DeviceHandleId, HostDevice>,
    next_handle_id: u32,
    _hotplug_registration: Option<Registration<Context>>,
    event_sender: async_channel::Sender<UsbEvent>,
}

impl DeviceManager {
    pub fn new(event_sender: async_channel::Sender<UsbEvent>) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            opened: HashMap::new(),
            next_handle_id: 1,
            _hotplug_registration: None,
            event_sender,
        })
    }

    /// Register hot-plug callbacks where libusb supports them
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb built without hot-plug support, device changes will not be reported");
            return Ok(());
        }

        let callback = HotplugCallback {
            event_sender: self.event_sender.clone(),
        };
        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Summaries of all connected devices except root hubs
    pub fn list_devices(&self) -> Vec<UsbDeviceSummary> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                return Vec::new();
            }
        };

        devices
            .iter()
            .filter_map(|device| {
                let descriptor = device.device_descriptor().ok()?;
                if is_root_hub(descriptor.vendor_id(), descriptor.class_code()) {
                    return None;
                }
                let handle = device.open().ok();
                Some(device_summary(&device, &descriptor, handle.as_ref()))
            })
            .collect()
    }

    /// Open the first connected device matching any of `filters`
    pub fn open_device(&mut self, filters: &[DeviceFilter]) -> Result<OpenedDevice, UsbError> {
        let device = self.find_device(filters)?;

        let id = DeviceHandleId(self.next_handle_id);
        self.next_handle_id += 1;

        let host_device = HostDevice::open(device, id).map_err(|e| {
            warn!("Failed to open device: {}", e);
            map_rusb_error(e)
        })?;
        let snapshot = host_device.snapshot();

        info!("Opened {} as handle {}", host_device.summary(), id);
        self.opened.insert(id, host_device);
        Ok(snapshot)
    }

    /// Release claimed interfaces and close the device
    pub fn close_device(&mut self, handle: DeviceHandleId) {
        match self.opened.remove(&handle) {
            Some(mut device) => device.close(),
            None => debug!("Close requested for unknown handle {}", handle),
        }
    }

    pub fn get_device(&mut self, handle: DeviceHandleId) -> Result<&mut HostDevice, UsbError> {
        self.opened.get_mut(&handle).ok_or_else(|| {
            warn!("Device handle {} not found", handle);
            UsbError::NotFound
        })
    }

    /// Close every open device
    pub fn close_all(&mut self) {
        for (_, mut device) in self.opened.drain() {
            device.close();
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    fn find_device(&self, filters: &[DeviceFilter]) -> Result<Device<Context>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .map(|d| matches_any(filters, d.vendor_id(), d.product_id()))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                debug!("No connected device matches {} filter(s)", filters.len());
                UsbError::NotFound
            })
    }
}

/// Root hubs: Linux Foundation vendor id with the hub device class
fn is_root_hub(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == 0x1d6b && class_code == 9
}

/// Forwards hot-plug notifications as [`UsbEvent`]s
///
/// Runs inside libusb event handling, so it never blocks and never opens
/// the device.
struct HotplugCallback {
    event_sender: async_channel::Sender<UsbEvent>,
}

impl HotplugCallback {
    fn send(&self, event: UsbEvent) {
        if let Err(e) = self.event_sender.try_send(event) {
            debug!("Dropping hot-plug event: {}", e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        match device.device_descriptor() {
            Ok(descriptor) => self.send(UsbEvent::DeviceArrived {
                device: device_summary(&device, &descriptor, None),
            }),
            Err(e) => warn!("Failed to read descriptor of arrived device: {}", e),
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.send(UsbEvent::DeviceLeft {
            bus_number: device.bus_number(),
            device_address: device.address(),
        });
    }
}
