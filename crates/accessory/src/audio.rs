//! Audio stream negotiation and capture
//!
//! [`AudioCapture::open`] finds the first USB Audio streaming alternate that
//! declares endpoints, activates it, and then pulls isochronous packets on
//! demand. Nothing is transferred ahead of the consumer: each call to
//! [`AudioCapture::next_chunk`] issues at most one isochronous transfer.
//!
//! A capture is not restartable. Once it ends (cancelled, failed, or closed)
//! the interface it claimed is released and a new capture must be negotiated
//! from scratch.

use crate::device::{AoaDevice, UsbDevice};
use crate::error::{AccessoryError, Result};
use bytes::Bytes;
use futures::Stream;
use protocol::{
    AlternateInfo, ConfigurationInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Packet size requested per isochronous packet
pub const DEFAULT_PACKET_SIZE: u32 = 1024;

/// Transfer shape for a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioOptions {
    /// Requested length of each isochronous packet
    pub packet_size: u32,
    /// Packets per isochronous transfer
    pub packets_per_transfer: usize,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            packets_per_transfer: 1,
        }
    }
}

impl AudioOptions {
    fn packet_sizes(&self) -> Vec<u32> {
        vec![self.packet_size; self.packets_per_transfer.max(1)]
    }
}

/// The interface, alternate and endpoint a capture streams from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSelection {
    pub configuration_value: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub endpoint_number: u8,
}

/// First Audio/AudioStreaming alternate with at least one endpoint
///
/// Configurations, interfaces and alternates are scanned in the order the
/// device declares them.
pub fn find_audio_streaming_interface(
    configurations: &[ConfigurationInfo],
) -> Option<(&ConfigurationInfo, &InterfaceInfo, &AlternateInfo)> {
    configurations.iter().find_map(|configuration| {
        configuration.interfaces.iter().find_map(|interface| {
            interface
                .alternates
                .iter()
                .find(|alternate| alternate.is_audio_streaming() && !alternate.endpoints.is_empty())
                .map(|alternate| (configuration, interface, alternate))
        })
    })
}

/// First isochronous IN endpoint of an alternate setting
pub fn find_iso_in_endpoint(alternate: &AlternateInfo) -> Option<&EndpointInfo> {
    alternate
        .endpoints
        .iter()
        .find(|ep| ep.direction == Direction::In && ep.kind == EndpointKind::Isochronous)
}

/// Cancels the captures holding the paired [`CancelToken`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal observed by a capture
///
/// Dropping the [`CancelHandle`] without calling `cancel` does not cancel.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle gone without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected cancel handle and token
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// A negotiated audio stream
pub struct AudioCapture<D: UsbDevice + 'static> {
    device: Arc<AoaDevice<D>>,
    selection: AudioSelection,
    packet_sizes: Vec<u32>,
    pending: VecDeque<Bytes>,
    cancel: CancelToken,
    /// Interface claimed by this capture and not yet released
    claimed: bool,
    finished: bool,
}

impl<D: UsbDevice + 'static> AudioCapture<D> {
    /// Negotiate the audio streaming interface
    ///
    /// Selects the configuration, claims the interface and selects the
    /// alternate setting only where the device is not already in that state.
    pub async fn open(device: Arc<AoaDevice<D>>, options: AudioOptions) -> Result<Self> {
        let configurations = device.configurations()?;
        let (configuration, interface, alternate) =
            find_audio_streaming_interface(&configurations)
                .ok_or(AccessoryError::NoMatchingInterface)?;

        debug!(
            "Audio streaming candidate: configuration {}, interface {}, alternate {}",
            configuration.value, interface.number, alternate.setting
        );

        if device.active_configuration()? != Some(configuration.value) {
            device.select_configuration(configuration.value).await?;
        }

        let claimed = !interface.claimed;
        if claimed {
            device.claim_interface(interface.number).await?;
        }

        if interface.active_alternate != alternate.setting {
            if let Err(e) = device
                .select_alternate(interface.number, alternate.setting)
                .await
            {
                if claimed {
                    release_best_effort(&device, interface.number).await;
                }
                return Err(e);
            }
        }

        let Some(endpoint) = find_iso_in_endpoint(alternate) else {
            if claimed {
                release_best_effort(&device, interface.number).await;
            }
            return Err(AccessoryError::NoMatchingEndpoint {
                interface: interface.number,
                alternate: alternate.setting,
            });
        };

        let selection = AudioSelection {
            configuration_value: configuration.value,
            interface_number: interface.number,
            alternate_setting: alternate.setting,
            endpoint_number: endpoint.number,
        };
        info!(
            "Audio stream ready on interface {} alt {} endpoint {}",
            selection.interface_number, selection.alternate_setting, selection.endpoint_number
        );

        Ok(Self {
            device,
            selection,
            packet_sizes: options.packet_sizes(),
            pending: VecDeque::new(),
            cancel: CancelToken::never(),
            claimed,
            finished: false,
        })
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn selection(&self) -> AudioSelection {
        self.selection
    }

    /// Pull the next chunk of audio
    ///
    /// Returns `None` once the capture has ended. A transfer error is
    /// returned once, after which the capture has ended.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if self.cancel.is_cancelled() {
                self.finish().await;
                return None;
            }

            let endpoint = self.selection.endpoint_number;
            let outcome = {
                let device = &self.device;
                let packet_sizes = &self.packet_sizes;
                let cancel = &mut self.cancel;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = device.isochronous_in(endpoint, packet_sizes) => Some(result),
                }
            };

            match outcome {
                None => {
                    debug!("Audio capture cancelled");
                    self.finish().await;
                    return None;
                }
                Some(Ok(packets)) => {
                    self.pending
                        .extend(packets.into_iter().map(|packet| Bytes::from(packet.data)));
                }
                Some(Err(e)) => {
                    warn!("Audio transfer failed: {}", e);
                    self.finish().await;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Consume the capture as a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::unfold(self, |mut capture| async move {
            capture
                .next_chunk()
                .await
                .map(|item| (item, capture))
        })
    }

    /// End the capture and release the interface if this capture claimed it
    pub async fn close(mut self) -> Result<()> {
        self.finished = true;
        self.pending.clear();
        if !self.claimed {
            return Ok(());
        }
        self.claimed = false;
        self.device
            .release_interface(self.selection.interface_number)
            .await
    }

    async fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
        if self.claimed {
            self.claimed = false;
            release_best_effort(&self.device, self.selection.interface_number).await;
        }
    }
}

impl<D: UsbDevice + 'static> Drop for AudioCapture<D> {
    fn drop(&mut self) {
        if !self.claimed {
            return;
        }
        let device = self.device.clone();
        let interface = self.selection.interface_number;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_best_effort(&device, interface).await;
                });
            }
            Err(_) => warn!(
                "Audio capture dropped outside a runtime, interface {} left claimed",
                interface
            ),
        }
    }
}

async fn release_best_effort<D: UsbDevice>(device: &AoaDevice<D>, interface: u8) {
    match device.release_interface(interface).await {
        Ok(()) => debug!("Released audio interface {}", interface),
        Err(e) => warn!("Failed to release audio interface {}: {}", interface, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{alternate, interface, iso_in_endpoint};
    use protocol::{USB_CLASS_AUDIO, USB_SUBCLASS_AUDIO_STREAMING};

    fn streaming(setting: u8, endpoints: Vec<EndpointInfo>) -> AlternateInfo {
        alternate(setting, USB_CLASS_AUDIO, USB_SUBCLASS_AUDIO_STREAMING, endpoints)
    }

    fn bulk_in(number: u8) -> EndpointInfo {
        EndpointInfo {
            number,
            direction: Direction::In,
            kind: EndpointKind::Bulk,
            max_packet_size: 512,
        }
    }

    #[test]
    fn test_skips_zero_bandwidth_alternate() {
        let configurations = vec![ConfigurationInfo {
            value: 1,
            interfaces: vec![interface(
                3,
                vec![streaming(0, Vec::new()), streaming(1, vec![iso_in_endpoint(5)])],
            )],
        }];

        let (configuration, interface, alternate) =
            find_audio_streaming_interface(&configurations).unwrap();
        assert_eq!(configuration.value, 1);
        assert_eq!(interface.number, 3);
        assert_eq!(alternate.setting, 1);
    }

    #[test]
    fn test_first_match_across_configurations() {
        let configurations = vec![
            ConfigurationInfo {
                value: 1,
                interfaces: vec![interface(0, vec![alternate(0, 0xff, 0x42, vec![bulk_in(1)])])],
            },
            ConfigurationInfo {
                value: 2,
                interfaces: vec![
                    interface(0, vec![streaming(0, vec![iso_in_endpoint(1)])]),
                    interface(1, vec![streaming(0, vec![iso_in_endpoint(2)])]),
                ],
            },
        ];

        let (configuration, interface, _) =
            find_audio_streaming_interface(&configurations).unwrap();
        assert_eq!(configuration.value, 2);
        assert_eq!(interface.number, 0);
    }

    #[test]
    fn test_audio_control_is_not_a_candidate() {
        let configurations = vec![ConfigurationInfo {
            value: 1,
            interfaces: vec![interface(
                0,
                vec![alternate(0, USB_CLASS_AUDIO, 0x01, vec![iso_in_endpoint(1)])],
            )],
        }];
        assert!(find_audio_streaming_interface(&configurations).is_none());
    }

    #[test]
    fn test_find_iso_in_endpoint() {
        let out = EndpointInfo {
            number: 1,
            direction: Direction::Out,
            kind: EndpointKind::Isochronous,
            max_packet_size: 1024,
        };
        let alt = streaming(
            1,
            vec![out, bulk_in(2), iso_in_endpoint(3), iso_in_endpoint(4)],
        );
        assert_eq!(find_iso_in_endpoint(&alt).map(|ep| ep.number), Some(3));

        let alt = streaming(1, vec![bulk_in(2)]);
        assert!(find_iso_in_endpoint(&alt).is_none());
    }

    #[test]
    fn test_packet_sizes() {
        assert_eq!(AudioOptions::default().packet_sizes(), vec![1024]);

        let options = AudioOptions {
            packet_size: 192,
            packets_per_transfer: 3,
        };
        assert_eq!(options.packet_sizes(), vec![192, 192, 192]);

        let options = AudioOptions {
            packet_size: 192,
            packets_per_transfer: 0,
        };
        assert_eq!(options.packet_sizes(), vec![192]);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let (handle, mut token) = cancel_pair();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (handle, mut token) = cancel_pair();
        drop(handle);

        assert!(!token.is_cancelled());
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled()).await;
        assert!(result.is_err());
    }
}
