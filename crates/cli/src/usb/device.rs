//! Opened USB device
//!
//! Wraps an open rusb handle and tracks what this process changed on it
//! (claimed interfaces, selected alternates) so the descriptor snapshot
//! handed to the accessory layer reflects the live state.

use crate::usb::transfers::map_rusb_error;
use common::{DeviceHandleId, OpenedDevice, UsbDeviceSummary};
use protocol::{
    AlternateInfo, ConfigurationInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo,
    UsbError,
};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use std::collections::HashMap;
use tracing::{debug, warn};

/// An open device with cached descriptors
pub struct HostDevice {
    id: DeviceHandleId,
    handle: DeviceHandle<Context>,
    summary: UsbDeviceSummary,
    /// Descriptor tree, without claim state
    configurations: Vec<ConfigurationInfo>,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
    /// Alternate settings selected by us, per interface
    alternates: HashMap<u8, u8>,
}

impl HostDevice {
    /// Open the device and read its descriptors
    pub fn open(device: Device<Context>, id: DeviceHandleId) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let mut handle = device.open()?;

        // Not supported on every platform; claiming will report the real problem
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }

        let summary = device_summary(&device, &descriptor, Some(&handle));
        let configurations = read_configurations(&device, &descriptor);

        debug!("Opened {} as handle {}", summary, id);

        Ok(Self {
            id,
            handle,
            summary,
            configurations,
            claimed_interfaces: Vec::new(),
            alternates: HashMap::new(),
        })
    }

    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }

    pub fn summary(&self) -> &UsbDeviceSummary {
        &self.summary
    }

    /// bConfigurationValue of the active configuration, if configured
    pub fn active_configuration(&self) -> Option<u8> {
        match self.handle.active_configuration() {
            Ok(0) => None,
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Could not read active configuration: {}", e);
                None
            }
        }
    }

    /// Descriptor tree annotated with the current claim and alternate state
    pub fn configurations(&self) -> Vec<ConfigurationInfo> {
        let active = self.active_configuration();
        let mut configurations = self.configurations.clone();

        for configuration in configurations
            .iter_mut()
            .filter(|c| Some(c.value) == active)
        {
            for interface in configuration.interfaces.iter_mut() {
                interface.claimed = self.claimed_interfaces.contains(&interface.number);
                interface.active_alternate =
                    self.alternates.get(&interface.number).copied().unwrap_or(0);
            }
        }

        configurations
    }

    pub fn snapshot(&self) -> OpenedDevice {
        OpenedDevice {
            handle: self.id,
            summary: self.summary.clone(),
            configurations: self.configurations(),
            active_configuration: self.active_configuration(),
        }
    }

    pub fn select_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        self.handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)?;
        self.alternates.clear();
        debug!("Selected configuration {} on handle {}", value, self.id);
        Ok(())
    }

    pub fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        if !self.claimed_interfaces.contains(&interface) {
            self.claimed_interfaces.push(interface);
        }
        debug!("Claimed interface {} on handle {}", interface, self.id);
        Ok(())
    }

    pub fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        self.claimed_interfaces.retain(|i| *i != interface);
        self.alternates.remove(&interface);
        debug!("Released interface {} on handle {}", interface, self.id);
        Ok(())
    }

    pub fn select_alternate(&mut self, interface: u8, alternate: u8) -> Result<(), UsbError> {
        self.handle
            .set_alternate_setting(interface, alternate)
            .map_err(map_rusb_error)?;
        self.alternates.insert(interface, alternate);
        debug!(
            "Selected alternate {} on interface {} of handle {}",
            alternate, interface, self.id
        );
        Ok(())
    }

    /// Release every claimed interface
    ///
    /// The handle itself is closed when this value is dropped.
    pub fn close(&mut self) {
        for interface in std::mem::take(&mut self.claimed_interfaces) {
            match self.handle.release_interface(interface) {
                Ok(()) => debug!("Released interface {} on close", interface),
                // Expected after StartAccessory: the device is already gone
                Err(rusb::Error::NoDevice) => {}
                Err(e) => warn!("Failed to release interface {}: {}", interface, e),
            }
        }
        self.alternates.clear();
        debug!("Closed handle {}", self.id);
    }
}

/// Summary of an enumerated device
///
/// String descriptors are only read when a handle is available.
pub fn device_summary<T: UsbContext>(
    device: &Device<T>,
    descriptor: &DeviceDescriptor,
    handle: Option<&DeviceHandle<T>>,
) -> UsbDeviceSummary {
    let read = |index: Option<u8>| {
        let handle = handle?;
        index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
    };

    UsbDeviceSummary {
        bus_number: device.bus_number(),
        device_address: device.address(),
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        manufacturer: read(descriptor.manufacturer_string_index()),
        product: read(descriptor.product_string_index()),
        serial_number: read(descriptor.serial_number_string_index()),
    }
}

/// Read every configuration descriptor in declared order
fn read_configurations<T: UsbContext>(
    device: &Device<T>,
    descriptor: &DeviceDescriptor,
) -> Vec<ConfigurationInfo> {
    (0..descriptor.num_configurations())
        .filter_map(|index| match device.config_descriptor(index) {
            Ok(config) => Some(ConfigurationInfo {
                value: config.number(),
                interfaces: config
                    .interfaces()
                    .map(|interface| InterfaceInfo {
                        number: interface.number(),
                        claimed: false,
                        active_alternate: 0,
                        alternates: interface
                            .descriptors()
                            .map(|alt| AlternateInfo {
                                setting: alt.setting_number(),
                                class: alt.class_code(),
                                subclass: alt.sub_class_code(),
                                protocol: alt.protocol_code(),
                                endpoints: alt
                                    .endpoint_descriptors()
                                    .map(|ep| EndpointInfo {
                                        number: ep.number(),
                                        direction: map_direction(ep.direction()),
                                        kind: map_transfer_type(ep.transfer_type()),
                                        max_packet_size: ep.max_packet_size(),
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            }),
            Err(e) => {
                warn!("Failed to read configuration descriptor {}: {}", index, e);
                None
            }
        })
        .collect()
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_type(kind: rusb::TransferType) -> EndpointKind {
    match kind {
        rusb::TransferType::Control => EndpointKind::Control,
        rusb::TransferType::Isochronous => EndpointKind::Isochronous,
        rusb::TransferType::Bulk => EndpointKind::Bulk,
        rusb::TransferType::Interrupt => EndpointKind::Interrupt,
    }
}
