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

//! GATT server and advertising lifecycle.
//!
//! [`GattAdvertisingManager`] owns one GATT server and the advertising start
//! sequence for it. When the platform has no advertiser yet (the adapter may
//! still be powering on) the start is retried on a fixed interval, up to a
//! fixed number of times. Platform events are fed in through
//! [`GattAdvertisingManager::dispatch`] and forwarded to a
//! [`GattEventHandler`].
//!
//! None of the public operations return errors: failures are logged and the
//! operation is abandoned.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ble_constants::{BLE_RETRY_INTERVAL, BLE_RETRY_LIMIT};
use super::platform::{BlePlatform, GattServer, LeAdvertiser};
use super::types::{
    AdvertiseCallback, AdvertiseData, AdvertiseSettings, ConnectionState, DeviceAddress,
    GattCharacteristic, GattServerEvent, GattService, GattStatus, ReadRequest, WriteRequest,
};

/// Receives connection and characteristic events from the manager.
///
/// Read and write requests have already been answered with success when the
/// hooks run; a handler reacts to a request, it cannot reject it.
pub trait GattEventHandler: Send {
    /// A remote GATT client connected.
    fn on_remote_device_connected(&mut self, _device: DeviceAddress) {}

    /// A remote GATT client disconnected.
    fn on_remote_device_disconnected(&mut self, _device: DeviceAddress) {}

    /// A remote client wrote to a characteristic.
    fn on_characteristic_write(&mut self, request: &WriteRequest);

    /// A remote client read a characteristic.
    fn on_characteristic_read(&mut self, request: &ReadRequest);
}

/// Bound on automatic advertising retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: BLE_RETRY_LIMIT,
            interval: BLE_RETRY_INTERVAL,
        }
    }
}

/// Observable state of the advertising start sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingStatus {
    /// Nothing requested yet, or cleaned up.
    Idle,
    /// Waiting for an advertiser; `attempt` retries scheduled so far.
    Retrying { session: u64, attempt: u32 },
    /// Advertising was started.
    Advertising { session: u64 },
    /// The retry limit was reached without an advertiser.
    GaveUp { session: u64, attempts: u32 },
    /// Stopped by the owner.
    Stopped,
}

/// State of one `start_advertising` call until it succeeds, gives up or is
/// replaced. Dropping the session cancels its pending retry.
#[derive(Debug)]
struct RetrySession {
    id: u64,
    service: Uuid,
    settings: AdvertiseSettings,
    data: AdvertiseData,
    callback: AdvertiseCallback,
    attempts: u32,
    deadline: Option<Instant>,
}

/// Owns the GATT server and the advertising lifecycle for one handler.
pub struct GattAdvertisingManager<P: BlePlatform, H: GattEventHandler> {
    platform: P,
    handler: H,
    policy: RetryPolicy,
    settings: AdvertiseSettings,
    include_device_name: bool,
    server: Option<P::Server>,
    advertiser: Option<P::Advertiser>,
    session: Option<RetrySession>,
    next_session_id: u64,
    status: AdvertisingStatus,
}

impl<P: BlePlatform, H: GattEventHandler> GattAdvertisingManager<P, H> {
    /// Create a manager with the default retry policy and advertise settings.
    pub fn new(platform: P, handler: H) -> Self {
        Self {
            platform,
            handler,
            policy: RetryPolicy::default(),
            settings: AdvertiseSettings::default(),
            include_device_name: true,
            server: None,
            advertiser: None,
            session: None,
            next_session_id: 0,
            status: AdvertisingStatus::Idle,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_advertise_settings(
        mut self,
        settings: AdvertiseSettings,
        include_device_name: bool,
    ) -> Self {
        self.settings = settings;
        self.include_device_name = include_device_name;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn is_server_open(&self) -> bool {
        self.server.is_some()
    }

    pub fn advertising_status(&self) -> AdvertisingStatus {
        self.status
    }

    /// Retries scheduled by the current session; zero when there is none.
    pub fn retry_count(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.attempts)
    }

    /// When the pending retry is due, if one is scheduled.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.deadline)
    }

    /// Register `service` on the GATT server and start advertising it.
    ///
    /// Opens the server on first use. Any session from an earlier call is
    /// cancelled, including its pending retry.
    pub async fn start_advertising(&mut self, service: GattService, callback: AdvertiseCallback) {
        debug!("start_advertising: {}", service.uuid());

        if !self.platform.supports_le().await {
            error!("System does not support BLE");
            return;
        }

        if self.server.is_none() {
            debug!("Opening a new GATT server");
            match self.platform.open_gatt_server().await {
                Ok(server) => self.server = Some(server),
                Err(e) => {
                    error!("GATT server not created: {}", e);
                    return;
                }
            }
        }

        let Some(server) = self.server.as_mut() else {
            return;
        };
        server.clear_services().await;
        if let Err(e) = server.add_service(&service).await {
            error!("Failed to add service {}: {}", service.uuid(), e);
        }

        let data = AdvertiseData {
            include_device_name: self.include_device_name,
            service_uuids: vec![service.uuid()],
        };

        if let Some(previous) = self.session.take() {
            debug!(
                "Cancelling advertising session {} for {}",
                previous.id, previous.service
            );
        }
        self.next_session_id += 1;
        self.session = Some(RetrySession {
            id: self.next_session_id,
            service: service.uuid(),
            settings: self.settings.clone(),
            data,
            callback,
            attempts: 0,
            deadline: None,
        });

        self.attempt_start().await;
    }

    /// One attempt of the start sequence for the current session.
    async fn attempt_start(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.deadline = None;

        match self.platform.le_advertiser().await {
            Some(mut advertiser) => {
                advertiser
                    .start_advertising(&session.settings, &session.data, session.callback.clone())
                    .await;
                session.attempts = 0;
                self.advertiser = Some(advertiser);
                self.status = AdvertisingStatus::Advertising {
                    session: session.id,
                };
                info!(
                    "Advertising requested for service {} (session {})",
                    session.service, session.id
                );
            }
            None if session.attempts < self.policy.limit => {
                session.attempts += 1;
                session.deadline = Some(Instant::now() + self.policy.interval);
                debug!(
                    "LE advertiser unavailable, retry {}/{} in {:?}",
                    session.attempts, self.policy.limit, self.policy.interval
                );
                self.status = AdvertisingStatus::Retrying {
                    session: session.id,
                    attempt: session.attempts,
                };
                self.session = Some(session);
            }
            None => {
                error!(
                    "Cannot start BLE advertisement for {}. Advertise retry count: {}",
                    session.service, session.attempts
                );
                self.status = AdvertisingStatus::GaveUp {
                    session: session.id,
                    attempts: session.attempts,
                };
            }
        }
    }

    /// Run the pending retry if its deadline has passed.
    pub async fn on_retry_due(&mut self, now: Instant) {
        let due = self
            .session
            .as_ref()
            .and_then(|s| s.deadline)
            .is_some_and(|deadline| deadline <= now);
        if due {
            self.attempt_start().await;
        }
    }

    /// Stop the advertisement started with `callback` and cancel any pending
    /// retry. Makes no platform call when no advertiser was ever obtained.
    pub async fn stop_advertising(&mut self, callback: &AdvertiseCallback) {
        if let Some(session) = self.session.take() {
            debug!("Cancelling pending advertising retry (session {})", session.id);
            self.status = AdvertisingStatus::Stopped;
        }
        if let Some(advertiser) = self.advertiser.as_mut() {
            debug!("stop_advertising");
            advertiser.stop_advertising(callback).await;
            self.status = AdvertisingStatus::Stopped;
        }
    }

    /// Notify `device` that `characteristic` changed. No-op without a server.
    pub async fn notify_characteristic_changed(
        &mut self,
        device: DeviceAddress,
        characteristic: &GattCharacteristic,
        confirm: bool,
    ) {
        if let Some(server) = self.server.as_mut() {
            if let Err(e) = server
                .notify_characteristic_changed(device, characteristic, confirm)
                .await
            {
                warn!(
                    "Failed to notify {} of {} change: {}",
                    device,
                    characteristic.uuid(),
                    e
                );
            }
        }
    }

    /// Release the advertiser, disconnect every device and close the server.
    ///
    /// Safe to call when nothing is open.
    pub async fn cleanup(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Cancelling advertising session {} on cleanup", session.id);
        }

        if let Some(mut advertiser) = self.advertiser.take() {
            advertiser.cleanup().await;
        }

        if let Some(server) = self.server.as_mut() {
            server.clear_services().await;
            match self.platform.connected_devices().await {
                Ok(devices) => {
                    for device in devices {
                        server.cancel_connection(device).await;
                    }
                }
                Err(e) => error!("Error getting connected devices: {}", e),
            }
        }
        self.stop_gatt_server().await;

        self.status = AdvertisingStatus::Idle;
    }

    /// Close the GATT server if one is open.
    pub async fn stop_gatt_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            debug!("stop_gatt_server");
            server.close().await;
        }
    }

    /// Translate a platform event into a handler notification.
    pub async fn dispatch(&mut self, event: GattServerEvent) {
        match event {
            GattServerEvent::ConnectionStateChanged {
                device, new_state, ..
            } => {
                debug!("BLE connection state change: {} {:?}", device, new_state);
                match new_state {
                    ConnectionState::Connected => self.handler.on_remote_device_connected(device),
                    ConnectionState::Disconnected => {
                        self.handler.on_remote_device_disconnected(device)
                    }
                    other => warn!(
                        "Connection state not connected or disconnected; ignoring: {:?}",
                        other
                    ),
                }
            }
            GattServerEvent::ServiceAdded { status, service } => {
                debug!("Service added status: {:?} uuid: {}", status, service);
            }
            GattServerEvent::CharacteristicReadRequest(request) => {
                debug!(
                    "Read request for characteristic: {}",
                    request.characteristic.uuid()
                );
                let Some(server) = self.server.as_mut() else {
                    warn!(
                        "Dropping read request {} from {}: no GATT server",
                        request.request_id, request.device
                    );
                    return;
                };
                let value = request.characteristic.value();
                if let Err(e) = server
                    .send_response(
                        request.device,
                        request.request_id,
                        GattStatus::Success,
                        request.offset,
                        &value,
                    )
                    .await
                {
                    warn!("Failed to answer read request {}: {}", request.request_id, e);
                }
                self.handler.on_characteristic_read(&request);
            }
            GattServerEvent::CharacteristicWriteRequest(request) => {
                debug!(
                    "Write request for characteristic: {} value: {}",
                    request.characteristic.uuid(),
                    hex::encode(&request.value)
                );
                let Some(server) = self.server.as_mut() else {
                    warn!(
                        "Dropping write request {} from {}: no GATT server",
                        request.request_id, request.device
                    );
                    return;
                };
                if let Err(e) = server
                    .send_response(
                        request.device,
                        request.request_id,
                        GattStatus::Success,
                        request.offset,
                        &request.value,
                    )
                    .await
                {
                    warn!("Failed to answer write request {}: {}", request.request_id, e);
                }
                self.handler.on_characteristic_write(&request);
            }
        }
    }
}
