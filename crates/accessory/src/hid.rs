//! HID accessory session
//!
//! A session is bound to one accessory id on one device:
//!
//! ```text
//! register ──> Registered ──send_event*──> Registered ──unregister──> Unregistered (terminal)
//! ```
//!
//! [`HidAccessory::register`] is the only constructor, so a session that was
//! never registered cannot exist. Operations on a session are serialized
//! through an internal lock; the control transfers of one session never
//! interleave.
//!
//! Unregistering while events are still in flight on the device side is not
//! defined by the protocol; the session does not try to drain them.

use crate::device::{AoaDevice, UsbDevice};
use crate::error::{AccessoryError, Result};
use protocol::{ControlSetup, MouseReport, descriptor_len};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Registered,
    Unregistered,
}

/// A virtual HID device registered on an accessory
///
/// Never-registered sessions are unrepresentable, but the terminal state
/// after [`HidAccessory::unregister`] is a runtime flag rather than a
/// consuming typestate: sessions are shared behind an `Arc` so several
/// tasks can call [`HidAccessory::send_event`] concurrently, and `unregister`
/// cannot take `self` by value through a shared reference. Calls on an
/// unregistered session fail with [`AccessoryError::InvalidSessionState`].
pub struct HidAccessory<D: UsbDevice + 'static> {
    device: Arc<AoaDevice<D>>,
    accessory_id: u16,
    state: Mutex<SessionState>,
}

impl<D: UsbDevice + 'static> HidAccessory<D> {
    /// Register a HID device and upload its report descriptor
    ///
    /// Sends RegisterHid (announcing the descriptor length) and then
    /// SetHidReportDescriptor. Either both succeed and a registered session
    /// is returned, or an error is returned and nothing is retained. If the
    /// descriptor upload fails, or this future is dropped once RegisterHid
    /// has been issued, UnregisterHid is attempted best-effort.
    pub async fn register(
        device: Arc<AoaDevice<D>>,
        accessory_id: u16,
        descriptor: &[u8],
    ) -> Result<Self> {
        let length = descriptor_len(descriptor)?;

        // Armed before RegisterHid: the host may carry out the transfer even if
        // this future is dropped while waiting for the reply.
        let guard = RegistrationGuard::arm(device.clone(), accessory_id);
        if let Err(e) = device
            .control_out(ControlSetup::register_hid(accessory_id, length), &[])
            .await
        {
            guard.disarm();
            return Err(e);
        }

        let upload = device
            .control_out(
                ControlSetup::set_hid_report_descriptor(accessory_id),
                descriptor,
            )
            .await;
        guard.disarm();

        if let Err(e) = upload {
            warn!(
                "Uploading report descriptor for accessory {} failed: {}",
                accessory_id, e
            );
            unregister_best_effort(&device, accessory_id).await;
            return Err(e);
        }

        info!(
            "Registered HID accessory {} ({} byte descriptor)",
            accessory_id, length
        );

        Ok(Self {
            device,
            accessory_id,
            state: Mutex::new(SessionState::Registered),
        })
    }

    pub fn accessory_id(&self) -> u16 {
        self.accessory_id
    }

    pub async fn is_registered(&self) -> bool {
        *self.state.lock().await == SessionState::Registered
    }

    /// Send one raw input report
    pub async fn send_event(&self, event: &[u8]) -> Result<()> {
        let state = self.state.lock().await;
        if *state != SessionState::Registered {
            return Err(AccessoryError::InvalidSessionState(
                "send_event on an unregistered HID accessory",
            ));
        }
        self.device
            .control_out(ControlSetup::send_hid_event(self.accessory_id), event)
            .await
    }

    /// Send one mouse report
    pub async fn send_mouse(&self, report: &MouseReport) -> Result<()> {
        self.send_event(&report.to_bytes()).await
    }

    /// Unregister the HID device
    ///
    /// The session is terminal afterwards. If the transfer fails the session
    /// stays registered.
    pub async fn unregister(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != SessionState::Registered {
            return Err(AccessoryError::InvalidSessionState(
                "HID accessory already unregistered",
            ));
        }
        self.device
            .control_out(ControlSetup::unregister_hid(self.accessory_id), &[])
            .await?;
        *state = SessionState::Unregistered;
        info!("Unregistered HID accessory {}", self.accessory_id);
        Ok(())
    }
}

async fn unregister_best_effort<D: UsbDevice>(device: &AoaDevice<D>, accessory_id: u16) {
    match device
        .control_out(ControlSetup::unregister_hid(accessory_id), &[])
        .await
    {
        Ok(()) => debug!("Cleaned up half-registered accessory {}", accessory_id),
        Err(e) => warn!(
            "Failed to clean up half-registered accessory {}: {}",
            accessory_id, e
        ),
    }
}

/// Unregisters on drop unless disarmed
///
/// Covers a registration future that is cancelled anywhere between issuing
/// RegisterHid and the completion of SetHidReportDescriptor.
struct RegistrationGuard<D: UsbDevice + 'static> {
    device: Option<Arc<AoaDevice<D>>>,
    accessory_id: u16,
}

impl<D: UsbDevice + 'static> RegistrationGuard<D> {
    fn arm(device: Arc<AoaDevice<D>>, accessory_id: u16) -> Self {
        Self {
            device: Some(device),
            accessory_id,
        }
    }

    fn disarm(mut self) {
        self.device = None;
    }
}

impl<D: UsbDevice + 'static> Drop for RegistrationGuard<D> {
    fn drop(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        let accessory_id = self.accessory_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Registration of accessory {} cancelled mid-sequence, unregistering",
                    accessory_id
                );
                handle.spawn(async move {
                    unregister_best_effort(&device, accessory_id).await;
                });
            }
            Err(_) => warn!(
                "Registration of accessory {} cancelled outside a runtime, left half-registered",
                accessory_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockCall, MockDevice};
    use protocol::{AoaRequest, HidMouse, UsbError};

    fn device(mock: MockDevice) -> Arc<AoaDevice<MockDevice>> {
        Arc::new(AoaDevice::new(mock))
    }

    #[tokio::test]
    async fn test_register_sequence() {
        let device = device(MockDevice::new());
        let session = HidAccessory::register(device.clone(), 1, HidMouse::DESCRIPTOR)
            .await
            .unwrap();

        assert!(session.is_registered().await);
        assert_eq!(
            device.inner().calls(),
            vec![
                MockCall::ControlOut {
                    setup: ControlSetup::register_hid(1, HidMouse::DESCRIPTOR.len() as u16),
                    data: Vec::new(),
                },
                MockCall::ControlOut {
                    setup: ControlSetup::set_hid_report_descriptor(1),
                    data: HidMouse::DESCRIPTOR.to_vec(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_register_failure_on_first_transfer() {
        let device = device(
            MockDevice::new().fail_request(AoaRequest::RegisterHid, UsbError::Pipe),
        );
        let result = HidAccessory::register(device.clone(), 1, HidMouse::DESCRIPTOR).await;

        assert!(matches!(
            result,
            Err(AccessoryError::TransferRejected { .. })
        ));
        // Nothing registered, nothing to clean up
        assert_eq!(device.inner().control_requests(), vec![AoaRequest::RegisterHid]);
    }

    #[tokio::test]
    async fn test_register_failure_cleans_up() {
        let device = device(
            MockDevice::new().fail_request(AoaRequest::SetHidReportDescriptor, UsbError::Pipe),
        );
        let result = HidAccessory::register(device.clone(), 4, HidMouse::DESCRIPTOR).await;

        assert!(result.is_err());
        assert_eq!(
            device.inner().control_requests(),
            vec![
                AoaRequest::RegisterHid,
                AoaRequest::SetHidReportDescriptor,
                AoaRequest::UnregisterHid,
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_descriptor_rejected_without_transfer() {
        let device = device(MockDevice::new());
        let descriptor = vec![0u8; u16::MAX as usize + 1];
        let result = HidAccessory::register(device.clone(), 1, &descriptor).await;

        assert!(matches!(result, Err(AccessoryError::Protocol(_))));
        assert!(device.inner().calls().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_terminal() {
        let device = device(MockDevice::new());
        let session = HidAccessory::register(device.clone(), 2, HidMouse::DESCRIPTOR)
            .await
            .unwrap();

        session.unregister().await.unwrap();
        assert!(!session.is_registered().await);

        let before = device.inner().calls().len();
        assert!(matches!(
            session.send_event(&[0; 5]).await,
            Err(AccessoryError::InvalidSessionState(_))
        ));
        assert!(matches!(
            session.unregister().await,
            Err(AccessoryError::InvalidSessionState(_))
        ));
        assert_eq!(device.inner().calls().len(), before);
    }

    #[tokio::test]
    async fn test_failed_unregister_keeps_session() {
        let device = device(
            MockDevice::new().fail_request(AoaRequest::UnregisterHid, UsbError::NoDevice),
        );
        let session = HidAccessory::register(device.clone(), 2, HidMouse::DESCRIPTOR)
            .await
            .unwrap();

        assert!(session.unregister().await.is_err());
        assert!(session.is_registered().await);

        device.inner().clear_failure(AoaRequest::UnregisterHid);
        session.unregister().await.unwrap();
        assert!(!session.is_registered().await);
    }
}
