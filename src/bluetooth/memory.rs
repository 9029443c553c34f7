// Copyright 2026 The Car Trust Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory platform for builds without BlueZ and for tests.
//!
//! Every platform call is recorded in order. Failures (no LE support, server
//! open failure, advertiser not ready, device enumeration failure) can be
//! scripted up front. Clones share state, so a test keeps one clone to
//! inspect what the manager did with the other.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::platform::{BleError, BlePlatform, GattServer, LeAdvertiser};
use super::types::{
    ActiveAdvertisements, AdvertiseCallback, AdvertiseData, AdvertiseFailure, AdvertiseResult,
    AdvertiseSettings, DeviceAddress, GattCharacteristic, GattService, GattStatus,
};

/// A call the manager made into the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    OpenGattServer {
        success: bool,
    },
    ClearServices,
    AddService(Uuid),
    SendResponse {
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Vec<u8>,
    },
    NotifyCharacteristicChanged {
        device: DeviceAddress,
        characteristic: Uuid,
        value: Vec<u8>,
        confirm: bool,
    },
    CancelConnection(DeviceAddress),
    CloseServer,
    GetAdvertiser {
        available: bool,
    },
    StartAdvertising {
        settings: AdvertiseSettings,
        data: AdvertiseData,
    },
    StopAdvertising,
    CleanupAdvertiser,
    ConnectedDevices {
        success: bool,
    },
}

/// How many advertiser requests return `None` before one succeeds.
#[derive(Debug, Clone, Copy)]
enum Availability {
    After(u32),
    Never,
}

#[derive(Debug)]
struct MemoryState {
    le_supported: bool,
    fail_server_open: bool,
    advertiser: Availability,
    fail_enumeration: bool,
    connected: Vec<DeviceAddress>,
    services: Vec<Uuid>,
    open_servers: usize,
    calls: Vec<PlatformCall>,
}

/// Platform whose Bluetooth stack lives in memory.
#[derive(Debug, Clone)]
pub struct MemoryPlatform {
    state: Arc<Mutex<MemoryState>>,
    advertisements: ActiveAdvertisements<()>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// A platform with LE support and an advertiser ready immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                le_supported: true,
                fail_server_open: false,
                advertiser: Availability::After(0),
                fail_enumeration: false,
                connected: Vec::new(),
                services: Vec::new(),
                open_servers: 0,
                calls: Vec::new(),
            })),
            advertisements: ActiveAdvertisements::default(),
        }
    }

    pub fn without_le_support(self) -> Self {
        self.state.lock().le_supported = false;
        self
    }

    pub fn failing_server_open(self) -> Self {
        self.state.lock().fail_server_open = true;
        self
    }

    /// The first `times` advertiser requests find no advertiser.
    pub fn advertiser_unavailable(self, times: u32) -> Self {
        self.state.lock().advertiser = Availability::After(times);
        self
    }

    pub fn advertiser_never_available(self) -> Self {
        self.state.lock().advertiser = Availability::Never;
        self
    }

    pub fn with_connected_devices(self, devices: Vec<DeviceAddress>) -> Self {
        self.state.lock().connected = devices;
        self
    }

    pub fn failing_device_enumeration(self) -> Self {
        self.state.lock().fail_enumeration = true;
        self
    }

    /// Calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Services registered on the open server.
    pub fn registered_services(&self) -> Vec<Uuid> {
        self.state.lock().services.clone()
    }

    /// Number of servers opened and not yet closed.
    pub fn open_servers(&self) -> usize {
        self.state.lock().open_servers
    }

    pub fn is_advertising(&self) -> bool {
        !self.advertisements.is_empty()
    }

    fn record(&self, call: PlatformCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl BlePlatform for MemoryPlatform {
    type Server = MemoryGattServer;
    type Advertiser = MemoryAdvertiser;

    async fn supports_le(&self) -> bool {
        self.state.lock().le_supported
    }

    async fn open_gatt_server(&mut self) -> Result<Self::Server, BleError> {
        let mut state = self.state.lock();
        let success = !state.fail_server_open;
        state.calls.push(PlatformCall::OpenGattServer { success });
        if !success {
            return Err(BleError::ServerNotCreated("scripted failure".to_string()));
        }
        state.open_servers += 1;
        info!("In-memory GATT server opened");
        Ok(MemoryGattServer {
            platform: self.clone(),
        })
    }

    async fn le_advertiser(&mut self) -> Option<Self::Advertiser> {
        let mut state = self.state.lock();
        let available = match state.advertiser {
            Availability::After(0) => true,
            Availability::After(n) => {
                state.advertiser = Availability::After(n - 1);
                false
            }
            Availability::Never => false,
        };
        state.calls.push(PlatformCall::GetAdvertiser { available });
        available.then(|| MemoryAdvertiser {
            platform: self.clone(),
        })
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceAddress>, BleError> {
        let mut state = self.state.lock();
        let success = !state.fail_enumeration;
        state.calls.push(PlatformCall::ConnectedDevices { success });
        if success {
            Ok(state.connected.clone())
        } else {
            Err(BleError::Unsupported(
                "connected device enumeration".to_string(),
            ))
        }
    }
}

/// GATT server handed out by [`MemoryPlatform`].
#[derive(Debug)]
pub struct MemoryGattServer {
    platform: MemoryPlatform,
}

#[async_trait]
impl GattServer for MemoryGattServer {
    async fn clear_services(&mut self) {
        let mut state = self.platform.state.lock();
        state.services.clear();
        state.calls.push(PlatformCall::ClearServices);
    }

    async fn add_service(&mut self, service: &GattService) -> Result<(), BleError> {
        let mut state = self.platform.state.lock();
        state.services.push(service.uuid());
        state.calls.push(PlatformCall::AddService(service.uuid()));
        Ok(())
    }

    async fn send_response(
        &mut self,
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: &[u8],
    ) -> Result<(), BleError> {
        self.platform.record(PlatformCall::SendResponse {
            device,
            request_id,
            status,
            offset,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn notify_characteristic_changed(
        &mut self,
        device: DeviceAddress,
        characteristic: &GattCharacteristic,
        confirm: bool,
    ) -> Result<(), BleError> {
        self.platform.record(PlatformCall::NotifyCharacteristicChanged {
            device,
            characteristic: characteristic.uuid(),
            value: characteristic.value(),
            confirm,
        });
        Ok(())
    }

    async fn cancel_connection(&mut self, device: DeviceAddress) {
        let mut state = self.platform.state.lock();
        state.connected.retain(|d| *d != device);
        state.calls.push(PlatformCall::CancelConnection(device));
    }

    async fn close(&mut self) {
        let mut state = self.platform.state.lock();
        state.services.clear();
        state.open_servers = state.open_servers.saturating_sub(1);
        state.calls.push(PlatformCall::CloseServer);
        info!("In-memory GATT server closed");
    }
}

/// Advertiser handed out by [`MemoryPlatform`].
#[derive(Debug)]
pub struct MemoryAdvertiser {
    platform: MemoryPlatform,
}

#[async_trait]
impl LeAdvertiser for MemoryAdvertiser {
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertiseCallback,
    ) {
        self.platform.record(PlatformCall::StartAdvertising {
            settings: settings.clone(),
            data: data.clone(),
        });
        if !self.platform.advertisements.insert(callback.clone(), ()) {
            callback.on_result(AdvertiseResult::Failed(AdvertiseFailure::AlreadyStarted));
            return;
        }
        if data.service_uuids.is_empty() {
            warn!("Advertising with no service UUIDs");
        }
        callback.on_result(AdvertiseResult::Started(settings.clone()));
    }

    async fn stop_advertising(&mut self, callback: &AdvertiseCallback) {
        self.platform.advertisements.remove(callback);
        self.platform.record(PlatformCall::StopAdvertising);
    }

    async fn cleanup(&mut self) {
        self.platform.advertisements.clear();
        self.platform.record(PlatformCall::CleanupAdvertiser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertiser_availability_script() {
        let mut platform = MemoryPlatform::new().advertiser_unavailable(2);

        assert!(platform.le_advertiser().await.is_none());
        assert!(platform.le_advertiser().await.is_none());
        assert!(platform.le_advertiser().await.is_some());
        assert!(platform.le_advertiser().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_removes_only_matching_advertisement() {
        let mut platform = MemoryPlatform::new();
        let mut advertiser = platform.le_advertiser().await.unwrap();
        let first = AdvertiseCallback::noop();
        let second = AdvertiseCallback::noop();
        let data = AdvertiseData::for_service(Uuid::nil());

        advertiser
            .start_advertising(&AdvertiseSettings::default(), &data, first.clone())
            .await;
        advertiser
            .start_advertising(&AdvertiseSettings::default(), &data, second.clone())
            .await;
        advertiser.stop_advertising(&first).await;
        assert!(platform.is_advertising());

        advertiser.stop_advertising(&second).await;
        assert!(!platform.is_advertising());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mut platform = MemoryPlatform::new();
        let observer = platform.clone();

        let _server = platform.open_gatt_server().await.unwrap();

        assert_eq!(observer.open_servers(), 1);
        assert_eq!(
            observer.calls(),
            vec![PlatformCall::OpenGattServer { success: true }]
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_reports_already_started() {
        let mut platform = MemoryPlatform::new();
        let mut first = platform.le_advertiser().await.unwrap();
        let mut second = platform.le_advertiser().await.unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        let callback = {
            let results = results.clone();
            AdvertiseCallback::new(move |r| results.lock().push(r))
        };
        let data = AdvertiseData::for_service(Uuid::nil());

        first
            .start_advertising(&AdvertiseSettings::default(), &data, callback.clone())
            .await;
        second
            .start_advertising(&AdvertiseSettings::default(), &data, callback.clone())
            .await;

        assert_eq!(
            results.lock().as_slice(),
            &[
                AdvertiseResult::Started(AdvertiseSettings::default()),
                AdvertiseResult::Failed(AdvertiseFailure::AlreadyStarted),
            ]
        );

        // Advertisers from the same platform share what is running.
        second.stop_advertising(&callback).await;
        assert!(!platform.is_advertising());
    }
}
