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

//! BlueZ platform built on `bluer`.
//!
//! BlueZ has no per-request GATT server callbacks of the kind the manager
//! expects, so this layer adapts:
//!
//! - services are served as one BlueZ application, re-registered whenever the
//!   service set changes;
//! - read and write callbacks turn into [`GattServerEvent`]s and wait for the
//!   manager's `send_response` through a oneshot keyed by request id;
//! - connection state comes from polling the adapter's devices;
//! - notifications go through a per-characteristic notify session.

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
    CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, Service,
};
use bluer::gatt::WriteOp;
use bluer::{Adapter, Address, AddressType, Session};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ble_constants::CONNECTION_POLL_INTERVAL;
use super::platform::{BleError, BlePlatform, GattServer, LeAdvertiser};
use super::types::{
    ActiveAdvertisements, AdvertiseCallback, AdvertiseData, AdvertiseFailure, AdvertiseResult,
    AdvertiseSettings, ConnectionState, DeviceAddress, GattCharacteristic, GattServerEvent,
    GattService, GattStatus, ReadRequest, WriteRequest,
};

/// Answer to a pending read or write callback.
#[derive(Debug)]
struct Response {
    status: GattStatus,
    value: Vec<u8>,
}

type PendingResponses = Arc<Mutex<HashMap<u32, oneshot::Sender<Response>>>>;
type Notifiers = Arc<Mutex<HashMap<Uuid, mpsc::Sender<Vec<u8>>>>>;

fn device_address(address: Address) -> DeviceAddress {
    DeviceAddress(address.0)
}

fn bluez_address(device: DeviceAddress) -> Address {
    Address(device.0)
}

/// BlueZ adapter wrapped as a [`BlePlatform`].
pub struct BluezPlatform {
    _session: Session,
    adapter: Adapter,
    events: mpsc::UnboundedSender<GattServerEvent>,
    advertisements: ActiveAdvertisements<AdvertisementHandle>,
}

impl BluezPlatform {
    /// Connect to BlueZ and pick an adapter (the default one unless named).
    ///
    /// Server events are sent to `events`; forward them to the manager.
    pub async fn new(
        adapter_name: Option<&str>,
        events: mpsc::UnboundedSender<GattServerEvent>,
    ) -> Result<Self, BleError> {
        info!("Initializing BlueZ platform...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            events,
            advertisements: ActiveAdvertisements::default(),
        })
    }

    /// Set the name the adapter advertises.
    pub async fn set_name(&self, name: &str) -> Result<(), BleError> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }
}

#[async_trait]
impl BlePlatform for BluezPlatform {
    type Server = BluezGattServer;
    type Advertiser = BluezAdvertiser;

    async fn supports_le(&self) -> bool {
        match self.adapter.supported_advertising_instances().await {
            Ok(instances) => {
                debug!("Adapter supports {} advertising instances", instances);
                true
            }
            Err(e) => {
                debug!("LE advertising manager unavailable: {}", e);
                false
            }
        }
    }

    async fn open_gatt_server(&mut self) -> Result<Self::Server, BleError> {
        // Fails when the adapter has gone away.
        let address = self.adapter.address().await?;
        debug!("Opening GATT server on {}", address);
        Ok(BluezGattServer::new(self.adapter.clone(), self.events.clone()))
    }

    async fn le_advertiser(&mut self) -> Option<Self::Advertiser> {
        match self.adapter.is_powered().await {
            Ok(true) => Some(BluezAdvertiser {
                adapter: self.adapter.clone(),
                active: self.advertisements.clone(),
            }),
            Ok(false) => {
                debug!("Adapter {} is not powered yet", self.adapter.name());
                None
            }
            Err(e) => {
                debug!("Cannot query adapter power state: {}", e);
                None
            }
        }
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceAddress>, BleError> {
        connected_devices(&self.adapter).await
    }
}

/// Connected LE devices. Classic BR/EDR links (headsets and the like) are
/// not GATT clients of this server.
async fn connected_devices(adapter: &Adapter) -> Result<Vec<DeviceAddress>, BleError> {
    let mut devices = Vec::new();
    for address in adapter.device_addresses().await? {
        let device = adapter.device(address)?;
        let connected = device.is_connected().await.unwrap_or(false);
        if !connected {
            continue;
        }
        let address_type = device.address_type().await.unwrap_or(AddressType::BrEdr);
        devices.push((address, address_type, connected));
    }
    Ok(gatt_clients(devices))
}

fn gatt_clients(
    devices: impl IntoIterator<Item = (Address, AddressType, bool)>,
) -> Vec<DeviceAddress> {
    devices
        .into_iter()
        .filter(|(_, address_type, connected)| {
            *connected && matches!(address_type, AddressType::LePublic | AddressType::LeRandom)
        })
        .map(|(address, _, _)| device_address(address))
        .collect()
}

/// Everything a characteristic callback needs to hand a request to the
/// manager and wait for its answer.
#[derive(Clone)]
struct RequestContext {
    characteristic: GattCharacteristic,
    events: mpsc::UnboundedSender<GattServerEvent>,
    pending: PendingResponses,
    next_request_id: Arc<AtomicU32>,
}

impl RequestContext {
    fn register(&self) -> (u32, oneshot::Receiver<Response>) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        (request_id, rx)
    }

    async fn read(self, req: CharacteristicReadRequest) -> Result<Vec<u8>, ReqError> {
        let (request_id, rx) = self.register();
        let event = GattServerEvent::CharacteristicReadRequest(ReadRequest {
            device: device_address(req.device_address),
            request_id,
            offset: usize::from(req.offset),
            characteristic: self.characteristic.clone(),
        });
        if self.events.send(event).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(ReqError::Failed);
        }
        match rx.await {
            Ok(Response {
                status: GattStatus::Success,
                value,
            }) => Ok(value),
            _ => Err(ReqError::Failed),
        }
    }

    async fn write(self, value: Vec<u8>, req: CharacteristicWriteRequest) -> Result<(), ReqError> {
        let response_needed = req.op_type != WriteOp::Command;
        let (request_id, rx) = if response_needed {
            let (id, rx) = self.register();
            (id, Some(rx))
        } else {
            (self.next_request_id.fetch_add(1, Ordering::Relaxed), None)
        };

        let event = GattServerEvent::CharacteristicWriteRequest(WriteRequest {
            device: device_address(req.device_address),
            request_id,
            characteristic: self.characteristic.clone(),
            prepared_write: req.op_type == WriteOp::Reliable,
            response_needed,
            offset: usize::from(req.offset),
            value,
        });
        if self.events.send(event).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(ReqError::Failed);
        }

        match rx {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(Response {
                    status: GattStatus::Success,
                    ..
                }) => Ok(()),
                _ => Err(ReqError::Failed),
            },
        }
    }
}

/// GATT server backed by a BlueZ application.
pub struct BluezGattServer {
    adapter: Adapter,
    events: mpsc::UnboundedSender<GattServerEvent>,
    services: Vec<GattService>,
    app_handle: Option<ApplicationHandle>,
    pending: PendingResponses,
    notifiers: Notifiers,
    next_request_id: Arc<AtomicU32>,
    monitor: JoinHandle<()>,
}

impl BluezGattServer {
    fn new(adapter: Adapter, events: mpsc::UnboundedSender<GattServerEvent>) -> Self {
        let monitor = spawn_connection_monitor(adapter.clone(), events.clone());
        Self {
            adapter,
            events,
            services: Vec::new(),
            app_handle: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU32::new(1)),
            monitor,
        }
    }

    fn request_context(&self, characteristic: &GattCharacteristic) -> RequestContext {
        RequestContext {
            characteristic: characteristic.clone(),
            events: self.events.clone(),
            pending: self.pending.clone(),
            next_request_id: self.next_request_id.clone(),
        }
    }

    fn build_characteristic(&self, characteristic: &GattCharacteristic) -> Characteristic {
        let properties = characteristic.properties();

        let read = properties.read.then(|| {
            let ctx = self.request_context(characteristic);
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    ctx.clone().read(req).boxed()
                }),
                ..Default::default()
            }
        });

        let write = (properties.write || properties.write_without_response).then(|| {
            let ctx = self.request_context(characteristic);
            CharacteristicWrite {
                write: properties.write,
                write_without_response: properties.write_without_response,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                        ctx.clone().write(value, req).boxed()
                    },
                )),
                ..Default::default()
            }
        });

        let notify = (properties.notify || properties.indicate).then(|| {
            let notifiers = self.notifiers.clone();
            let uuid = characteristic.uuid();
            CharacteristicNotify {
                notify: properties.notify,
                indicate: properties.indicate,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    notify_session(uuid, notifier, notifiers.clone()).boxed()
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid: characteristic.uuid(),
            read,
            write,
            notify,
            ..Default::default()
        }
    }

    /// Serve the current service set, replacing any earlier registration.
    async fn register(&mut self) -> Result<(), BleError> {
        self.app_handle = None;
        if self.services.is_empty() {
            return Ok(());
        }

        let services = self
            .services
            .iter()
            .map(|service| Service {
                uuid: service.uuid(),
                primary: service.is_primary(),
                characteristics: service
                    .characteristics()
                    .iter()
                    .map(|c| self.build_characteristic(c))
                    .collect(),
                ..Default::default()
            })
            .collect();

        let app = Application {
            services,
            ..Default::default()
        };
        self.app_handle = Some(self.adapter.serve_gatt_application(app).await?);
        Ok(())
    }
}

/// Forward values queued for `uuid` to a subscribed client until either side
/// goes away.
async fn notify_session(uuid: Uuid, mut notifier: CharacteristicNotifier, notifiers: Notifiers) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
    notifiers.lock().insert(uuid, tx);
    debug!("Notification session started for {}", uuid);

    while let Some(value) = rx.recv().await {
        if let Err(e) = notifier.notify(value).await {
            warn!("Failed to send notification for {}: {}", uuid, e);
            break;
        }
    }

    notifiers.lock().remove(&uuid);
    debug!("Notification session ended for {}", uuid);
}

#[async_trait]
impl GattServer for BluezGattServer {
    async fn clear_services(&mut self) {
        self.services.clear();
        self.app_handle = None;
        self.notifiers.lock().clear();
    }

    async fn add_service(&mut self, service: &GattService) -> Result<(), BleError> {
        self.services.push(service.clone());
        let result = self.register().await;
        let status = if result.is_ok() {
            GattStatus::Success
        } else {
            GattStatus::Failure
        };
        let _ = self.events.send(GattServerEvent::ServiceAdded {
            status,
            service: service.uuid(),
        });
        if result.is_ok() {
            info!("GATT service {} registered", service.uuid());
        }
        result
    }

    async fn send_response(
        &mut self,
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: &[u8],
    ) -> Result<(), BleError> {
        let Some(tx) = self.pending.lock().remove(&request_id) else {
            debug!("No pending request {} from {}", request_id, device);
            return Ok(());
        };
        // BlueZ expects the bytes from the requested offset onwards.
        let value = value.get(offset..).unwrap_or_default().to_vec();
        tx.send(Response { status, value })
            .map_err(|_| BleError::Platform(format!("request {request_id} abandoned by BlueZ")))
    }

    async fn notify_characteristic_changed(
        &mut self,
        device: DeviceAddress,
        characteristic: &GattCharacteristic,
        confirm: bool,
    ) -> Result<(), BleError> {
        let tx = self.notifiers.lock().get(&characteristic.uuid()).cloned();
        let Some(tx) = tx else {
            debug!(
                "No subscriber for {}; skipping notification to {}",
                characteristic.uuid(),
                device
            );
            return Ok(());
        };
        debug!(
            "Notifying {} of {} (confirm: {})",
            device,
            characteristic.uuid(),
            confirm
        );
        tx.send(characteristic.value())
            .await
            .map_err(|_| BleError::Platform("notification session closed".to_string()))
    }

    async fn cancel_connection(&mut self, device: DeviceAddress) {
        match self.adapter.device(bluez_address(device)) {
            Ok(remote) => {
                if let Err(e) = remote.disconnect().await {
                    warn!("Failed to disconnect {}: {}", device, e);
                }
            }
            Err(e) => warn!("Unknown device {}: {}", device, e),
        }
    }

    async fn close(&mut self) {
        self.app_handle = None;
        self.services.clear();
        self.notifiers.lock().clear();
        // Dropping the senders fails any callback still waiting.
        self.pending.lock().clear();
        self.monitor.abort();
        info!("GATT server closed");
    }
}

impl Drop for BluezGattServer {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

/// Poll the adapter for connected devices and report changes.
fn spawn_connection_monitor(
    adapter: Adapter,
    events: mpsc::UnboundedSender<GattServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting BlueZ connection monitor...");
        let mut known: HashSet<DeviceAddress> = HashSet::new();
        let mut interval = tokio::time::interval(CONNECTION_POLL_INTERVAL);

        loop {
            interval.tick().await;

            let current: HashSet<DeviceAddress> = match connected_devices(&adapter).await {
                Ok(devices) => devices.into_iter().collect(),
                Err(e) => {
                    debug!("Connection poll failed: {}", e);
                    continue;
                }
            };

            let changes = current
                .difference(&known)
                .map(|d| (*d, ConnectionState::Connected))
                .chain(
                    known
                        .difference(&current)
                        .map(|d| (*d, ConnectionState::Disconnected)),
                );
            for (device, new_state) in changes {
                let event = GattServerEvent::ConnectionStateChanged {
                    device,
                    status: GattStatus::Success,
                    new_state,
                };
                if events.send(event).is_err() {
                    debug!("Event receiver dropped; stopping connection monitor");
                    return;
                }
            }
            known = current;
        }
    })
}

/// LE advertiser backed by BlueZ advertisements.
///
/// Every advertiser for an adapter shares one set of running advertisements,
/// so replacing the advertiser does not drop what an earlier one started.
pub struct BluezAdvertiser {
    adapter: Adapter,
    active: ActiveAdvertisements<AdvertisementHandle>,
}

#[async_trait]
impl LeAdvertiser for BluezAdvertiser {
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertiseCallback,
    ) {
        if self.active.contains(&callback) {
            callback.on_result(AdvertiseResult::Failed(AdvertiseFailure::AlreadyStarted));
            return;
        }

        let local_name = if data.include_device_name {
            self.adapter.alias().await.ok()
        } else {
            None
        };
        let interval = settings.mode.interval();

        let advertisement = Advertisement {
            advertisement_type: if settings.connectable {
                Type::Peripheral
            } else {
                Type::Broadcast
            },
            service_uuids: data.service_uuids.iter().copied().collect(),
            local_name,
            discoverable: Some(true),
            min_interval: Some(interval),
            max_interval: Some(interval),
            tx_power: Some(settings.tx_power.dbm()),
            timeout: settings.timeout,
            ..Default::default()
        };

        match self.adapter.advertise(advertisement).await {
            Ok(handle) => {
                if !self.active.insert(callback.clone(), handle) {
                    callback.on_result(AdvertiseResult::Failed(AdvertiseFailure::AlreadyStarted));
                    return;
                }
                info!("BLE advertising started");
                callback.on_result(AdvertiseResult::Started(settings.clone()));
            }
            Err(e) => {
                error!("Failed to start advertising: {}", e);
                callback.on_result(AdvertiseResult::Failed(AdvertiseFailure::InternalError));
            }
        }
    }

    async fn stop_advertising(&mut self, callback: &AdvertiseCallback) {
        // Dropping a handle unregisters the advertisement.
        if self.active.remove(callback).is_some() {
            info!("BLE advertising stopped");
        }
    }

    async fn cleanup(&mut self) {
        let stopped = self.active.clear();
        if stopped > 0 {
            info!("Stopped {} BLE advertisement(s)", stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LE_PHONE: Address = Address([0xD1, 0, 0, 0, 0, 1]);
    const LE_WATCH: Address = Address([0xD2, 0, 0, 0, 0, 2]);
    const HEADSET: Address = Address([0xD3, 0, 0, 0, 0, 3]);

    #[test]
    fn test_gatt_clients_skip_classic_and_disconnected_devices() {
        let clients = gatt_clients([
            (LE_PHONE, AddressType::LePublic, true),
            (LE_WATCH, AddressType::LeRandom, true),
            (HEADSET, AddressType::BrEdr, true),
            (Address([0xD4, 0, 0, 0, 0, 4]), AddressType::LeRandom, false),
        ]);

        assert_eq!(
            clients,
            vec![DeviceAddress(LE_PHONE.0), DeviceAddress(LE_WATCH.0)]
        );
    }

    #[test]
    fn test_gatt_clients_empty_when_only_classic_links() {
        assert!(gatt_clients([(HEADSET, AddressType::BrEdr, true)]).is_empty());
    }
}
