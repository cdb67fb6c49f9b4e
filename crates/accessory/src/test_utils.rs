//! Test utilities for aoa-bridge
//!
//! [`MockDevice`] implements [`UsbDevice`] in memory: it records every call,
//! answers control IN requests from a queue, fails or stalls selected
//! operations on demand, and plays back scripted isochronous results.
//!
//! # Example
//!
//! ```
//! use accessory::test_utils::MockDevice;
//! use accessory::{AoaDevice, get_protocol_version};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let device = AoaDevice::new(MockDevice::new().with_control_in(vec![0x02, 0x00]));
//! assert_eq!(get_protocol_version(&device).await.unwrap(), 2);
//! # }
//! ```

use crate::device::{UsbDevice, UsbResult};
use async_trait::async_trait;
use protocol::{
    AlternateInfo, AoaRequest, ConfigurationInfo, ControlSetup, Direction, EndpointInfo,
    EndpointKind, InterfaceInfo, IsoPacket, UsbError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One recorded call on a [`MockDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ControlOut { setup: ControlSetup, data: Vec<u8> },
    ControlIn { setup: ControlSetup, length: u16 },
    SelectConfiguration(u8),
    ClaimInterface(u8),
    ReleaseInterface(u8),
    SelectAlternate { interface: u8, alternate: u8 },
    IsochronousIn { endpoint: u8, packet_sizes: Vec<u32> },
}

#[derive(Default)]
struct MockState {
    configurations: Vec<ConfigurationInfo>,
    active_configuration: Option<u8>,
    calls: Vec<MockCall>,
    control_in: VecDeque<Vec<u8>>,
    failing_requests: HashMap<AoaRequest, UsbError>,
    failing_claims: HashMap<u8, UsbError>,
    hanging_requests: HashSet<AoaRequest>,
    iso_results: VecDeque<UsbResult<Vec<IsoPacket>>>,
}

/// In-memory [`UsbDevice`]
///
/// When the isochronous script runs out, further isochronous transfers never
/// complete, like a device that stops producing samples.
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configurations(self, configurations: Vec<ConfigurationInfo>) -> Self {
        self.lock().configurations = configurations;
        self
    }

    pub fn with_active_configuration(self, value: Option<u8>) -> Self {
        self.lock().active_configuration = value;
        self
    }

    /// Queue a response for the next control IN transfer
    pub fn with_control_in(self, data: Vec<u8>) -> Self {
        self.lock().control_in.push_back(data);
        self
    }

    /// Make every control transfer with `request` fail
    pub fn fail_request(self, request: AoaRequest, error: UsbError) -> Self {
        self.lock().failing_requests.insert(request, error);
        self
    }

    /// Record control transfers with `request` but never complete them
    pub fn hang_request(self, request: AoaRequest) -> Self {
        self.lock().hanging_requests.insert(request);
        self
    }

    /// Make claiming `interface` fail
    pub fn fail_claim(self, interface: u8, error: UsbError) -> Self {
        self.lock().failing_claims.insert(interface, error);
        self
    }

    /// Queue the result of the next isochronous transfer
    pub fn push_iso(self, result: UsbResult<Vec<IsoPacket>>) -> Self {
        self.lock().iso_results.push_back(result);
        self
    }

    /// Stop failing control transfers with `request`
    pub fn clear_failure(&self, request: AoaRequest) {
        self.lock().failing_requests.remove(&request);
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Request codes of the control transfers so far, in order
    pub fn control_requests(&self) -> Vec<AoaRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::ControlOut { setup, .. } | MockCall::ControlIn { setup, .. } => {
                    Some(setup.request)
                }
                _ => None,
            })
            .collect()
    }

    /// Interfaces currently claimed in the active configuration
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        let state = self.lock();
        state
            .configurations
            .iter()
            .filter(|c| Some(c.value) == state.active_configuration)
            .flat_map(|c| c.interfaces.iter())
            .filter(|i| i.claimed)
            .map(|i| i.number)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_interface(state: &mut MockState, interface: u8, f: impl Fn(&mut InterfaceInfo)) {
        let active = state.active_configuration;
        state
            .configurations
            .iter_mut()
            .filter(|c| Some(c.value) == active)
            .flat_map(|c| c.interfaces.iter_mut())
            .filter(|i| i.number == interface)
            .for_each(f);
    }
}

#[async_trait]
impl UsbDevice for MockDevice {
    async fn control_transfer_out(&self, setup: ControlSetup, data: &[u8]) -> UsbResult<()> {
        let outcome = {
            let mut state = self.lock();
            state.calls.push(MockCall::ControlOut {
                setup,
                data: data.to_vec(),
            });
            if state.hanging_requests.contains(&setup.request) {
                None
            } else {
                Some(match state.failing_requests.get(&setup.request) {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                })
            }
        };
        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn control_transfer_in(&self, setup: ControlSetup, length: u16) -> UsbResult<Vec<u8>> {
        let mut state = self.lock();
        state.calls.push(MockCall::ControlIn { setup, length });
        if let Some(error) = state.failing_requests.get(&setup.request) {
            return Err(error.clone());
        }
        let mut data = state.control_in.pop_front().ok_or(UsbError::Pipe)?;
        data.truncate(length as usize);
        Ok(data)
    }

    fn configurations(&self) -> Vec<ConfigurationInfo> {
        self.lock().configurations.clone()
    }

    fn active_configuration(&self) -> Option<u8> {
        self.lock().active_configuration
    }

    async fn select_configuration(&self, value: u8) -> UsbResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::SelectConfiguration(value));
        if !state.configurations.iter().any(|c| c.value == value) {
            return Err(UsbError::NotFound);
        }
        state.active_configuration = Some(value);
        Ok(())
    }

    async fn claim_interface(&self, interface: u8) -> UsbResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::ClaimInterface(interface));
        if let Some(error) = state.failing_claims.get(&interface) {
            return Err(error.clone());
        }
        Self::with_interface(&mut state, interface, |i| i.claimed = true);
        Ok(())
    }

    async fn release_interface(&self, interface: u8) -> UsbResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::ReleaseInterface(interface));
        Self::with_interface(&mut state, interface, |i| i.claimed = false);
        Ok(())
    }

    async fn select_alternate_interface(&self, interface: u8, alternate: u8) -> UsbResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::SelectAlternate {
            interface,
            alternate,
        });
        Self::with_interface(&mut state, interface, |i| i.active_alternate = alternate);
        Ok(())
    }

    async fn isochronous_transfer_in(
        &self,
        endpoint: u8,
        packet_sizes: &[u32],
    ) -> UsbResult<Vec<IsoPacket>> {
        let next = {
            let mut state = self.lock();
            state.calls.push(MockCall::IsochronousIn {
                endpoint,
                packet_sizes: packet_sizes.to_vec(),
            });
            state.iso_results.pop_front()
        };
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

/// Isochronous IN endpoint descriptor
pub fn iso_in_endpoint(number: u8) -> EndpointInfo {
    EndpointInfo {
        number,
        direction: Direction::In,
        kind: EndpointKind::Isochronous,
        max_packet_size: 1024,
    }
}

/// Alternate setting with the given class codes and endpoints
pub fn alternate(
    setting: u8,
    class: u8,
    subclass: u8,
    endpoints: Vec<EndpointInfo>,
) -> AlternateInfo {
    AlternateInfo {
        setting,
        class,
        subclass,
        protocol: 0,
        endpoints,
    }
}

/// Unclaimed interface currently on alternate 0
pub fn interface(number: u8, alternates: Vec<AlternateInfo>) -> InterfaceInfo {
    InterfaceInfo {
        number,
        claimed: false,
        active_alternate: 0,
        alternates,
    }
}

/// Configuration layout of a device in AOA audio mode
///
/// Interface 0 is AudioControl. Interface 1 is AudioStreaming with a
/// zero-bandwidth alternate 0 and an isochronous IN endpoint 1 on alternate 1.
/// Interface 2 is a vendor-specific accessory interface.
pub fn audio_accessory_configuration(value: u8) -> ConfigurationInfo {
    ConfigurationInfo {
        value,
        interfaces: vec![
            interface(0, vec![alternate(0, 0x01, 0x01, Vec::new())]),
            interface(
                1,
                vec![
                    alternate(0, 0x01, 0x02, Vec::new()),
                    alternate(1, 0x01, 0x02, vec![iso_in_endpoint(1)]),
                ],
            ),
            interface(
                2,
                vec![alternate(
                    0,
                    0xff,
                    0xff,
                    vec![EndpointInfo {
                        number: 2,
                        direction: Direction::In,
                        kind: EndpointKind::Bulk,
                        max_packet_size: 512,
                    }],
                )],
            ),
        ],
    }
}

/// Create a mock device in AOA audio mode with configuration 1 active
pub fn create_mock_audio_device() -> MockDevice {
    MockDevice::new()
        .with_configurations(vec![audio_accessory_configuration(1)])
        .with_active_configuration(Some(1))
}
