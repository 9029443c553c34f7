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

//! Bluetooth LE peripheral module.
//!
//! Runs a GATT server and advertises its service, retrying while the adapter
//! is not ready.

pub mod ble_constants;
#[cfg(feature = "bluez")]
mod gatt_server;
mod handle;
mod manager;
pub mod memory;
mod platform;
mod types;

#[cfg(feature = "bluez")]
pub use gatt_server::{BluezAdvertiser, BluezGattServer, BluezPlatform};
pub use handle::{spawn, ManagerHandle};
pub use manager::{AdvertisingStatus, GattAdvertisingManager, GattEventHandler, RetryPolicy};
pub use memory::{MemoryPlatform, PlatformCall};
pub use platform::{BleError, BlePlatform, GattServer, LeAdvertiser};
pub use types::{
    ActiveAdvertisements, AdvertiseCallback, AdvertiseData, AdvertiseFailure, AdvertiseMode, AdvertiseResult,
    AdvertiseSettings, CharacteristicProperties, ConnectionState, DeviceAddress,
    GattCharacteristic, GattServerEvent, GattService, GattStatus, ReadRequest, TxPowerLevel,
    WriteRequest,
};
