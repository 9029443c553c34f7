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

//! Platform boundary: the Bluetooth stack the manager drives.
//!
//! A platform hands out at most one GATT server and, when the adapter is
//! ready, an LE advertiser. Events flowing the other way (connections, read
//! and write requests) are delivered to
//! [`GattAdvertisingManager::dispatch`](super::GattAdvertisingManager::dispatch)
//! by the integration layer.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    AdvertiseCallback, AdvertiseData, AdvertiseSettings, DeviceAddress, GattCharacteristic,
    GattService, GattStatus,
};

/// Errors raised by a platform.
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("GATT server not created: {0}")]
    ServerNotCreated(String),

    #[error("Manager task has stopped")]
    ManagerStopped,

    #[error("Platform error: {0}")]
    Platform(String),

    #[cfg(feature = "bluez")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

/// Entry point to a Bluetooth stack.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    type Server: GattServer;
    type Advertiser: LeAdvertiser;

    /// Whether the system supports Bluetooth LE peripheral operation.
    async fn supports_le(&self) -> bool;

    /// Open a GATT server.
    async fn open_gatt_server(&mut self) -> Result<Self::Server, BleError>;

    /// Get the LE advertiser, or `None` while the adapter is not ready.
    async fn le_advertiser(&mut self) -> Option<Self::Advertiser>;

    /// Devices currently connected to the GATT server profile.
    async fn connected_devices(&self) -> Result<Vec<DeviceAddress>, BleError>;
}

/// An open GATT server.
#[async_trait]
pub trait GattServer: Send {
    /// Remove every registered service.
    async fn clear_services(&mut self);

    /// Register a service.
    async fn add_service(&mut self, service: &GattService) -> Result<(), BleError>;

    /// Answer a pending read or write request.
    async fn send_response(
        &mut self,
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Push the characteristic's stored value to a connected device.
    async fn notify_characteristic_changed(
        &mut self,
        device: DeviceAddress,
        characteristic: &GattCharacteristic,
        confirm: bool,
    ) -> Result<(), BleError>;

    /// Drop the connection to a device.
    async fn cancel_connection(&mut self, device: DeviceAddress);

    /// Close the server. No other method is called afterwards.
    async fn close(&mut self);
}

/// An LE advertiser.
#[async_trait]
pub trait LeAdvertiser: Send {
    /// Start advertising; the outcome is reported through `callback`.
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertiseCallback,
    );

    /// Stop the advertisement started with `callback`.
    async fn stop_advertising(&mut self, callback: &AdvertiseCallback);

    /// Release every advertisement this advertiser holds.
    async fn cleanup(&mut self);
}
