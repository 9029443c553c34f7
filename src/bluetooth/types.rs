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

//! GATT and advertising value types shared by the manager and the platforms.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::ble_constants::{interval, tx_power};

/// Bluetooth address of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub [u8; 6]);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Properties a characteristic exposes to remote clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Readable and notifiable; the usual shape of a server-to-client channel.
    pub fn read_notify() -> Self {
        Self {
            read: true,
            notify: true,
            ..Default::default()
        }
    }

    /// Writable with and without response; the usual client-to-server channel.
    pub fn write() -> Self {
        Self {
            write: true,
            write_without_response: true,
            ..Default::default()
        }
    }
}

/// A characteristic of a GATT service.
///
/// The stored value is shared between clones, so a handler holding the
/// descriptor from a request can update what the next read returns.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    uuid: Uuid,
    properties: CharacteristicProperties,
    value: Arc<RwLock<Vec<u8>>>,
}

impl GattCharacteristic {
    /// Create a characteristic with an empty stored value.
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set the initial stored value.
    pub fn with_value(self, value: impl Into<Vec<u8>>) -> Self {
        *self.value.write() = value.into();
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// Current stored value.
    pub fn value(&self) -> Vec<u8> {
        self.value.read().clone()
    }

    /// Replace the stored value.
    pub fn set_value(&self, value: impl Into<Vec<u8>>) {
        *self.value.write() = value.into();
    }

    /// Apply a write at `offset`, growing the stored value when needed.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) {
        let mut value = self.value.write();
        let end = offset + bytes.len();
        if value.len() < end {
            value.resize(end, 0);
        }
        value[offset..end].copy_from_slice(bytes);
    }

    /// Whether both descriptors share the same stored value.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

/// A GATT service descriptor: what remote clients discover.
#[derive(Debug, Clone)]
pub struct GattService {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Create an empty primary service.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn characteristics(&self) -> &[GattCharacteristic] {
        &self.characteristics
    }

    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Advertising interval preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

impl AdvertiseMode {
    /// Advertising interval used for this mode.
    pub fn interval(self) -> Duration {
        match self {
            AdvertiseMode::LowPower => interval::LOW_POWER,
            AdvertiseMode::Balanced => interval::BALANCED,
            AdvertiseMode::LowLatency => interval::LOW_LATENCY,
        }
    }
}

/// Transmit power preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

impl TxPowerLevel {
    /// Transmit power in dBm.
    pub fn dbm(self) -> i16 {
        match self {
            TxPowerLevel::UltraLow => tx_power::ULTRA_LOW,
            TxPowerLevel::Low => tx_power::LOW,
            TxPowerLevel::Medium => tx_power::MEDIUM,
            TxPowerLevel::High => tx_power::HIGH,
        }
    }
}

/// How to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    /// Stop advertising after this long; `None` advertises until stopped.
    pub timeout: Option<Duration>,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            tx_power: TxPowerLevel::High,
            connectable: true,
            timeout: None,
        }
    }
}

/// What to put in the advertisement payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseData {
    pub include_device_name: bool,
    pub service_uuids: Vec<Uuid>,
}

impl AdvertiseData {
    /// Payload announcing a single service, with the device name included.
    pub fn for_service(uuid: Uuid) -> Self {
        Self {
            include_device_name: true,
            service_uuids: vec![uuid],
        }
    }
}

/// Reason an advertisement could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdvertiseFailure {
    #[error("advertising already started")]
    AlreadyStarted,
    #[error("internal advertising error")]
    InternalError,
}

/// Outcome reported to an [`AdvertiseCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseResult {
    Started(AdvertiseSettings),
    Failed(AdvertiseFailure),
}

/// Completion callback for an advertisement.
///
/// Clones refer to the same callback; [`AdvertiseCallback::same_as`] is how a
/// platform finds the advertisement to stop.
#[derive(Clone)]
pub struct AdvertiseCallback(Arc<dyn Fn(AdvertiseResult) + Send + Sync>);

impl AdvertiseCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(AdvertiseResult) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A callback that ignores every result.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn on_result(&self, result: AdvertiseResult) {
        (self.0)(result);
    }

    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl fmt::Debug for AdvertiseCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdvertiseCallback({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Advertisements running on one adapter, keyed by their callback.
///
/// Clones share the set, so every advertiser handed out for the adapter sees
/// what the others started. `T` is whatever keeps an advertisement alive; it
/// is dropped outside the lock.
pub struct ActiveAdvertisements<T> {
    entries: Arc<Mutex<Vec<(AdvertiseCallback, T)>>>,
}

impl<T> Clone for ActiveAdvertisements<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for ActiveAdvertisements<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> fmt::Debug for ActiveAdvertisements<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveAdvertisements")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ActiveAdvertisements<T> {
    pub fn contains(&self, callback: &AdvertiseCallback) -> bool {
        self.entries.lock().iter().any(|(cb, _)| cb.same_as(callback))
    }

    /// Track an advertisement. Returns `false`, leaving the set unchanged,
    /// when `callback` already has one.
    pub fn insert(&self, callback: AdvertiseCallback, entry: T) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|(cb, _)| cb.same_as(&callback)) {
            return false;
        }
        entries.push((callback, entry));
        true
    }

    pub fn remove(&self, callback: &AdvertiseCallback) -> Option<T> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|(cb, _)| cb.same_as(callback))?;
        Some(entries.remove(index).1)
    }

    /// Remove every advertisement; returns how many there were.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Connection state reported by the platform for a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// GATT status code for responses and service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure,
}

/// A characteristic read request from a remote client.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub device: DeviceAddress,
    pub request_id: u32,
    pub offset: usize,
    pub characteristic: GattCharacteristic,
}

/// A characteristic write request from a remote client.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub device: DeviceAddress,
    pub request_id: u32,
    pub characteristic: GattCharacteristic,
    pub prepared_write: bool,
    pub response_needed: bool,
    pub offset: usize,
    pub value: Vec<u8>,
}

/// Raw event from the platform's GATT server.
#[derive(Debug, Clone)]
pub enum GattServerEvent {
    ConnectionStateChanged {
        device: DeviceAddress,
        status: GattStatus,
        new_state: ConnectionState,
    },
    ServiceAdded {
        status: GattStatus,
        service: Uuid,
    },
    CharacteristicReadRequest(ReadRequest),
    CharacteristicWriteRequest(WriteRequest),
}
