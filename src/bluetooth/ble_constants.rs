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

//! BLE service and characteristic UUIDs and timing constants for the car trust agent.

use std::time::Duration;
use uuid::Uuid;

/// Car trust GATT service UUID.
pub const TRUST_SERVICE_UUID: Uuid = Uuid::from_u128(0x5e2a68a4_27be_43f9_8d1e_4546976fabd7);

/// Client write characteristic UUID (the phone writes here).
/// Properties: Write, Write Without Response
pub const CLIENT_WRITE_UUID: Uuid = Uuid::from_u128(0x5e2a68a5_27be_43f9_8d1e_4546976fabd7);

/// Server write characteristic UUID (the car publishes here).
/// Properties: Read, Notify
pub const SERVER_WRITE_UUID: Uuid = Uuid::from_u128(0x5e2a68a6_27be_43f9_8d1e_4546976fabd7);

/// Maximum number of automatic retries when no advertiser is available.
pub const BLE_RETRY_LIMIT: u32 = 5;

/// Delay between advertising retries.
pub const BLE_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// How often the BlueZ connection monitor polls for connected devices.
pub const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Advertising intervals per advertise mode.
pub mod interval {
    use std::time::Duration;

    pub const LOW_LATENCY: Duration = Duration::from_millis(100);
    pub const BALANCED: Duration = Duration::from_millis(250);
    pub const LOW_POWER: Duration = Duration::from_millis(1000);
}

/// Transmit power in dBm per power level.
pub mod tx_power {
    pub const HIGH: i16 = 1;
    pub const MEDIUM: i16 = -7;
    pub const LOW: i16 = -15;
    pub const ULTRA_LOW: i16 = -21;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TRUST_SERVICE_UUID.to_string(),
            "5e2a68a4-27be-43f9-8d1e-4546976fabd7"
        );
        assert_eq!(
            CLIENT_WRITE_UUID.to_string(),
            "5e2a68a5-27be-43f9-8d1e-4546976fabd7"
        );
        assert_ne!(CLIENT_WRITE_UUID, SERVER_WRITE_UUID);
    }

    #[test]
    fn test_intervals_ordered_by_latency() {
        assert!(interval::LOW_LATENCY < interval::BALANCED);
        assert!(interval::BALANCED < interval::LOW_POWER);
    }

    #[test]
    fn test_retry_budget() {
        // Five retries one second apart.
        assert_eq!(BLE_RETRY_LIMIT, 5);
        assert_eq!(BLE_RETRY_INTERVAL * BLE_RETRY_LIMIT, Duration::from_secs(5));
    }
}
