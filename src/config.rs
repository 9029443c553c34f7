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

//! Configuration module.
//!
//! Handles loading and saving the daemon's settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::ble_constants::{
    BLE_RETRY_INTERVAL, BLE_RETRY_LIMIT, CLIENT_WRITE_UUID, SERVER_WRITE_UUID, TRUST_SERVICE_UUID,
};
use crate::bluetooth::{
    AdvertiseMode, AdvertiseSettings, CharacteristicProperties, GattCharacteristic, GattService,
    RetryPolicy, TxPowerLevel,
};

const APP_DIR: &str = "car-trust-ble";

/// Daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth adapter settings.
    pub bluetooth: BluetoothConfig,

    /// Advertising settings.
    pub advertising: AdvertisingConfig,

    /// GATT service layout.
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name the adapter advertises.
    pub device_name: String,

    /// Adapter to use, e.g. "hci0". The default adapter when unset.
    pub adapter: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: "CarTrust".to_string(),
            adapter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    pub include_device_name: bool,

    /// Retries while the adapter has no advertiser yet.
    pub retry_limit: u32,

    /// Delay between retries in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        let settings = AdvertiseSettings::default();
        Self {
            mode: settings.mode,
            tx_power: settings.tx_power,
            connectable: settings.connectable,
            include_device_name: true,
            retry_limit: BLE_RETRY_LIMIT,
            retry_interval_ms: BLE_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Primary service UUID, also the advertised UUID.
    pub uuid: Uuid,

    /// Characteristic the remote device writes to.
    pub client_write_uuid: Uuid,

    /// Characteristic the remote device reads and subscribes to.
    pub server_write_uuid: Uuid,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            uuid: TRUST_SERVICE_UUID,
            client_write_uuid: CLIENT_WRITE_UUID,
            server_write_uuid: SERVER_WRITE_UUID,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: self.advertising.retry_limit,
            interval: Duration::from_millis(self.advertising.retry_interval_ms),
        }
    }

    pub fn advertise_settings(&self) -> AdvertiseSettings {
        AdvertiseSettings {
            mode: self.advertising.mode,
            tx_power: self.advertising.tx_power,
            connectable: self.advertising.connectable,
            timeout: None,
        }
    }

    /// The trust service with its two characteristics.
    pub fn build_service(&self) -> GattService {
        GattService::new(self.service.uuid)
            .with_characteristic(GattCharacteristic::new(
                self.service.client_write_uuid,
                CharacteristicProperties::write(),
            ))
            .with_characteristic(GattCharacteristic::new(
                self.service.server_write_uuid,
                CharacteristicProperties::read_notify(),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[advertising]\nmode = \"balanced\"\nretry_limit = 2\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.advertising.mode, AdvertiseMode::Balanced);
        assert_eq!(config.advertising.retry_limit, 2);
        assert_eq!(config.advertising.retry_interval_ms, 1000);
        assert_eq!(config.bluetooth.device_name, "CarTrust");
        assert_eq!(config.service.uuid, TRUST_SERVICE_UUID);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.bluetooth.adapter = Some("hci1".to_string());
        config.advertising.tx_power = TxPowerLevel::Low;

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[advertising]\nmode = \"warp\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.advertising.retry_interval_ms = 250;

        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                limit: 5,
                interval: Duration::from_millis(250),
            }
        );
        assert_eq!(config.advertise_settings(), AdvertiseSettings::default());

        let service = config.build_service();
        assert_eq!(service.uuid(), TRUST_SERVICE_UUID);
        assert!(service.characteristic(CLIENT_WRITE_UUID).unwrap().properties().write);
        assert!(service.characteristic(SERVER_WRITE_UUID).unwrap().properties().notify);
    }
}
