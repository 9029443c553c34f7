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

//! Event processing for the trust service.

use std::sync::Arc;
use tracing::{debug, info};

use crate::bluetooth::{DeviceAddress, GattEventHandler, ReadRequest, WriteRequest};
use crate::state::AppState;

/// Handles GATT events for the trust service.
///
/// Writes are stored in the written characteristic, so the next read of it
/// returns what the client wrote. Connections and accesses are recorded in
/// [`AppState`].
pub struct TrustSessionHandler {
    state: Arc<AppState>,
}

impl TrustSessionHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl GattEventHandler for TrustSessionHandler {
    fn on_remote_device_connected(&mut self, device: DeviceAddress) {
        info!("Device connected: {}", device);
        self.state.set_connected(device);
    }

    fn on_remote_device_disconnected(&mut self, device: DeviceAddress) {
        info!("Device disconnected: {}", device);
        self.state.set_disconnected(device);
    }

    fn on_characteristic_write(&mut self, request: &WriteRequest) {
        info!(
            "Received {} bytes from {} on {}",
            request.value.len(),
            request.device,
            request.characteristic.uuid()
        );
        request
            .characteristic
            .write_at(request.offset, &request.value);
        self.state
            .record_write(request.device, request.characteristic.uuid());
    }

    fn on_characteristic_read(&mut self, request: &ReadRequest) {
        debug!(
            "{} read {} at offset {}",
            request.device,
            request.characteristic.uuid(),
            request.offset
        );
        self.state
            .record_read(request.device, request.characteristic.uuid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{CharacteristicProperties, GattCharacteristic};
    use uuid::Uuid;

    const PHONE: DeviceAddress = DeviceAddress([1, 2, 3, 4, 5, 6]);

    fn write(characteristic: &GattCharacteristic, offset: usize, value: &[u8]) -> WriteRequest {
        WriteRequest {
            device: PHONE,
            request_id: 1,
            characteristic: characteristic.clone(),
            prepared_write: offset > 0,
            response_needed: true,
            offset,
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_writes_update_characteristic() {
        let state = AppState::new();
        let mut handler = TrustSessionHandler::new(state.clone());
        let characteristic =
            GattCharacteristic::new(Uuid::from_u128(7), CharacteristicProperties::write());

        handler.on_characteristic_write(&write(&characteristic, 0, b"unlock"));
        handler.on_characteristic_write(&write(&characteristic, 6, b"-car"));

        assert_eq!(characteristic.value(), b"unlock-car");
        let last = state.get_last_write().unwrap();
        assert_eq!(last.device, PHONE);
        assert_eq!(last.characteristic, Uuid::from_u128(7));
    }

    #[test]
    fn test_connection_hooks_update_state() {
        let state = AppState::new();
        let mut handler = TrustSessionHandler::new(state.clone());

        handler.on_remote_device_connected(PHONE);
        assert!(state.is_connected(PHONE));

        handler.on_remote_device_disconnected(PHONE);
        assert!(!state.is_connected(PHONE));
    }

    #[test]
    fn test_read_is_recorded() {
        let state = AppState::new();
        let mut handler = TrustSessionHandler::new(state.clone());
        let characteristic =
            GattCharacteristic::new(Uuid::from_u128(8), CharacteristicProperties::read_notify());

        handler.on_characteristic_read(&ReadRequest {
            device: PHONE,
            request_id: 3,
            offset: 0,
            characteristic,
        });

        assert_eq!(
            state.get_last_read().map(|a| a.characteristic),
            Some(Uuid::from_u128(8))
        );
    }
}
