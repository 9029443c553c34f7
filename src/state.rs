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

//! Application state management.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::bluetooth::{AdvertiseFailure, AdvertiseResult, DeviceAddress};

/// Advertising status as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    Idle,
    Advertising,
    Failed(AdvertiseFailure),
}

impl AdvertisingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvertisingState::Idle => "Idle",
            AdvertisingState::Advertising => "Advertising",
            AdvertisingState::Failed(_) => "Failed",
        }
    }
}

/// Last characteristic access by a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub device: DeviceAddress,
    pub characteristic: Uuid,
    pub at: DateTime<Local>,
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Connected devices and when they connected.
    pub connected: RwLock<HashMap<DeviceAddress, DateTime<Local>>>,

    /// Advertising status.
    pub advertising: RwLock<AdvertisingState>,

    pub last_read: RwLock<Option<Access>>,

    pub last_write: RwLock<Option<Access>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connected: RwLock::new(HashMap::new()),
            advertising: RwLock::new(AdvertisingState::Idle),
            last_read: RwLock::new(None),
            last_write: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, device: DeviceAddress) {
        self.connected.write().insert(device, Local::now());
    }

    pub fn set_disconnected(&self, device: DeviceAddress) {
        self.connected.write().remove(&device);
    }

    pub fn is_connected(&self, device: DeviceAddress) -> bool {
        self.connected.read().contains_key(&device)
    }

    pub fn connected_devices(&self) -> Vec<DeviceAddress> {
        self.connected.read().keys().copied().collect()
    }

    /// Record an advertise outcome reported through the advertise callback.
    pub fn record_advertise_result(&self, result: &AdvertiseResult) {
        *self.advertising.write() = match result {
            AdvertiseResult::Started(_) => AdvertisingState::Advertising,
            AdvertiseResult::Failed(reason) => AdvertisingState::Failed(*reason),
        };
    }

    pub fn set_advertising_stopped(&self) {
        *self.advertising.write() = AdvertisingState::Idle;
    }

    pub fn get_advertising(&self) -> AdvertisingState {
        *self.advertising.read()
    }

    pub fn record_read(&self, device: DeviceAddress, characteristic: Uuid) {
        *self.last_read.write() = Some(Access {
            device,
            characteristic,
            at: Local::now(),
        });
    }

    pub fn record_write(&self, device: DeviceAddress, characteristic: Uuid) {
        *self.last_write.write() = Some(Access {
            device,
            characteristic,
            at: Local::now(),
        });
    }

    pub fn get_last_read(&self) -> Option<Access> {
        self.last_read.read().clone()
    }

    pub fn get_last_write(&self) -> Option<Access> {
        self.last_write.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::AdvertiseSettings;

    const PHONE: DeviceAddress = DeviceAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    #[test]
    fn test_connection_tracking() {
        let state = AppState::new();

        state.set_connected(PHONE);
        assert!(state.is_connected(PHONE));
        assert_eq!(state.connected_devices(), vec![PHONE]);

        state.set_disconnected(PHONE);
        assert!(!state.is_connected(PHONE));
        assert!(state.connected_devices().is_empty());
    }

    #[test]
    fn test_advertise_results() {
        let state = AppState::new();
        assert_eq!(state.get_advertising(), AdvertisingState::Idle);

        state.record_advertise_result(&AdvertiseResult::Started(AdvertiseSettings::default()));
        assert_eq!(state.get_advertising(), AdvertisingState::Advertising);

        state.record_advertise_result(&AdvertiseResult::Failed(AdvertiseFailure::InternalError));
        assert_eq!(
            state.get_advertising(),
            AdvertisingState::Failed(AdvertiseFailure::InternalError)
        );
        assert_eq!(state.get_advertising().as_str(), "Failed");

        state.set_advertising_stopped();
        assert_eq!(state.get_advertising(), AdvertisingState::Idle);
    }
}
