//! Device handle boundary
//!
//! [`UsbDevice`] is what the host USB layer must provide: control and
//! isochronous transfers, configuration and interface selection, and a
//! snapshot of the descriptor tree. The accessory code never owns the
//! physical device; it talks to it through [`AoaDevice`], which adds logging,
//! error mapping and stale-handle tracking on top.

use crate::error::{AccessoryError, Result, UsbOperation};
use async_trait::async_trait;
use protocol::{ConfigurationInfo, ControlSetup, IsoPacket, UsbError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Result of a host USB layer call
pub type UsbResult<T> = std::result::Result<T, UsbError>;

/// Host USB layer primitives for one physical device
#[async_trait]
pub trait UsbDevice: Send + Sync {
    /// Host-to-device control transfer
    async fn control_transfer_out(&self, setup: ControlSetup, data: &[u8]) -> UsbResult<()>;

    /// Device-to-host control transfer reading up to `length` bytes
    async fn control_transfer_in(&self, setup: ControlSetup, length: u16) -> UsbResult<Vec<u8>>;

    /// Configurations in device-declared order, with current claim and
    /// alternate-setting state
    fn configurations(&self) -> Vec<ConfigurationInfo>;

    /// bConfigurationValue of the active configuration, if configured
    fn active_configuration(&self) -> Option<u8>;

    async fn select_configuration(&self, value: u8) -> UsbResult<()>;

    async fn claim_interface(&self, interface: u8) -> UsbResult<()>;

    async fn release_interface(&self, interface: u8) -> UsbResult<()>;

    async fn select_alternate_interface(&self, interface: u8, alternate: u8) -> UsbResult<()>;

    /// Isochronous IN transfer, one packet per entry of `packet_sizes`
    async fn isochronous_transfer_in(
        &self,
        endpoint: u8,
        packet_sizes: &[u32],
    ) -> UsbResult<Vec<IsoPacket>>;
}

/// A [`UsbDevice`] as seen by the accessory layer
///
/// Once [`crate::start_accessory`] succeeds the device disconnects and comes
/// back with a different identity, so every later operation through this
/// wrapper fails with [`AccessoryError::DeviceReenumerated`] without touching
/// the device.
pub struct AoaDevice<D> {
    inner: D,
    reenumerated: AtomicBool,
}

impl<D: UsbDevice> AoaDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            reenumerated: AtomicBool::new(false),
        }
    }

    /// The wrapped host device
    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Whether StartAccessory has been sent through this handle
    pub fn is_reenumerated(&self) -> bool {
        self.reenumerated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_reenumerated(&self) {
        self.reenumerated.store(true, Ordering::Release);
    }

    fn ensure_current(&self) -> Result<()> {
        if self.is_reenumerated() {
            warn!("Operation attempted on a re-enumerated device handle");
            return Err(AccessoryError::DeviceReenumerated);
        }
        Ok(())
    }

    /// Descriptor snapshot
    pub fn configurations(&self) -> Result<Vec<ConfigurationInfo>> {
        self.ensure_current()?;
        Ok(self.inner.configurations())
    }

    pub fn active_configuration(&self) -> Result<Option<u8>> {
        self.ensure_current()?;
        Ok(self.inner.active_configuration())
    }

    pub async fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<()> {
        self.ensure_current()?;
        debug!(
            "Control OUT: request={}, value={:#x}, index={:#x}, data_len={}",
            setup.request,
            setup.value,
            setup.index,
            data.len()
        );
        self.inner
            .control_transfer_out(setup, data)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::Control(setup.request)))
    }

    pub async fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>> {
        self.ensure_current()?;
        debug!(
            "Control IN: request={}, value={:#x}, index={:#x}, length={}",
            setup.request, setup.value, setup.index, length
        );
        let data = self
            .inner
            .control_transfer_in(setup, length)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::Control(setup.request)))?;
        debug!("Control IN {} returned {} bytes", setup.request, data.len());
        Ok(data)
    }

    pub async fn select_configuration(&self, value: u8) -> Result<()> {
        self.ensure_current()?;
        debug!("Selecting configuration {}", value);
        self.inner
            .select_configuration(value)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::SelectConfiguration(
                value,
            )))
    }

    pub async fn claim_interface(&self, interface: u8) -> Result<()> {
        self.ensure_current()?;
        debug!("Claiming interface {}", interface);
        self.inner
            .claim_interface(interface)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::ClaimInterface(
                interface,
            )))
    }

    pub async fn release_interface(&self, interface: u8) -> Result<()> {
        self.ensure_current()?;
        debug!("Releasing interface {}", interface);
        self.inner
            .release_interface(interface)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::ReleaseInterface(
                interface,
            )))
    }

    pub async fn select_alternate(&self, interface: u8, alternate: u8) -> Result<()> {
        self.ensure_current()?;
        debug!(
            "Selecting alternate setting {} on interface {}",
            alternate, interface
        );
        self.inner
            .select_alternate_interface(interface, alternate)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::SelectAlternate {
                interface,
                alternate,
            }))
    }

    pub async fn isochronous_in(
        &self,
        endpoint: u8,
        packet_sizes: &[u32],
    ) -> Result<Vec<IsoPacket>> {
        self.ensure_current()?;
        self.inner
            .isochronous_transfer_in(endpoint, packet_sizes)
            .await
            .map_err(AccessoryError::rejected(UsbOperation::IsochronousIn {
                endpoint,
            }))
    }
}
