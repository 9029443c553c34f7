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

//! Single-owner task for a [`GattAdvertisingManager`].
//!
//! The manager lives on one tokio task. Operations and platform events reach
//! it through a [`ManagerHandle`]; advertising retries fire from the same
//! task when the current session's deadline passes.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::manager::{AdvertisingStatus, GattAdvertisingManager, GattEventHandler};
use super::platform::{BleError, BlePlatform};
use super::types::{
    AdvertiseCallback, DeviceAddress, GattCharacteristic, GattServerEvent, GattService,
};

/// Commands accepted by the manager task.
#[derive(Debug)]
enum Command {
    StartAdvertising {
        service: GattService,
        callback: AdvertiseCallback,
    },
    StopAdvertising {
        callback: AdvertiseCallback,
    },
    NotifyCharacteristicChanged {
        device: DeviceAddress,
        characteristic: GattCharacteristic,
        confirm: bool,
    },
    Dispatch(GattServerEvent),
    Cleanup {
        done: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<AdvertisingStatus>,
    },
    Shutdown,
}

/// Cloneable handle to a running manager task.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
}

impl ManagerHandle {
    async fn send(&self, command: Command) -> Result<(), BleError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BleError::ManagerStopped)
    }

    pub async fn start_advertising(
        &self,
        service: GattService,
        callback: AdvertiseCallback,
    ) -> Result<(), BleError> {
        self.send(Command::StartAdvertising { service, callback })
            .await
    }

    pub async fn stop_advertising(&self, callback: AdvertiseCallback) -> Result<(), BleError> {
        self.send(Command::StopAdvertising { callback }).await
    }

    pub async fn notify_characteristic_changed(
        &self,
        device: DeviceAddress,
        characteristic: GattCharacteristic,
        confirm: bool,
    ) -> Result<(), BleError> {
        self.send(Command::NotifyCharacteristicChanged {
            device,
            characteristic,
            confirm,
        })
        .await
    }

    /// Deliver a platform event to the manager.
    pub async fn dispatch(&self, event: GattServerEvent) -> Result<(), BleError> {
        self.send(Command::Dispatch(event)).await
    }

    /// Run cleanup and wait for it to finish.
    pub async fn cleanup(&self) -> Result<(), BleError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Cleanup { done }).await?;
        rx.await.map_err(|_| BleError::ManagerStopped)
    }

    pub async fn status(&self) -> Result<AdvertisingStatus, BleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| BleError::ManagerStopped)
    }

    /// Ask the task to clean up and exit. The task's join handle yields the
    /// manager back.
    pub async fn shutdown(&self) -> Result<(), BleError> {
        self.send(Command::Shutdown).await
    }
}

/// Spawn the manager on its own task.
pub fn spawn<P, H>(
    manager: GattAdvertisingManager<P, H>,
) -> (ManagerHandle, JoinHandle<GattAdvertisingManager<P, H>>)
where
    P: BlePlatform + 'static,
    H: GattEventHandler + 'static,
{
    let (commands, rx) = mpsc::channel(32);
    let task = tokio::spawn(run(manager, rx));
    (ManagerHandle { commands }, task)
}

async fn run<P, H>(
    mut manager: GattAdvertisingManager<P, H>,
    mut commands: mpsc::Receiver<Command>,
) -> GattAdvertisingManager<P, H>
where
    P: BlePlatform,
    H: GattEventHandler,
{
    debug!("GATT manager task started");
    loop {
        let deadline = manager.retry_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => execute(&mut manager, command).await,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                manager.on_retry_due(Instant::now()).await;
            }
        }
    }

    manager.cleanup().await;
    info!("GATT manager task stopped");
    manager
}

async fn execute<P, H>(manager: &mut GattAdvertisingManager<P, H>, command: Command)
where
    P: BlePlatform,
    H: GattEventHandler,
{
    match command {
        Command::StartAdvertising { service, callback } => {
            manager.start_advertising(service, callback).await;
        }
        Command::StopAdvertising { callback } => {
            manager.stop_advertising(&callback).await;
        }
        Command::NotifyCharacteristicChanged {
            device,
            characteristic,
            confirm,
        } => {
            manager
                .notify_characteristic_changed(device, &characteristic, confirm)
                .await;
        }
        Command::Dispatch(event) => manager.dispatch(event).await,
        Command::Cleanup { done } => {
            manager.cleanup().await;
            let _ = done.send(());
        }
        Command::Status { reply } => {
            let _ = reply.send(manager.advertising_status());
        }
        Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::{MemoryPlatform, PlatformCall};
    use crate::bluetooth::types::{ReadRequest, WriteRequest};
    use std::time::Duration;
    use uuid::Uuid;

    struct NullHandler;

    impl GattEventHandler for NullHandler {
        fn on_characteristic_write(&mut self, _request: &WriteRequest) {}
        fn on_characteristic_read(&mut self, _request: &ReadRequest) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fires_from_task_timer() {
        let platform = MemoryPlatform::new().advertiser_unavailable(1);
        let (handle, task) = spawn(GattAdvertisingManager::new(platform.clone(), NullHandler));

        handle
            .start_advertising(GattService::new(Uuid::from_u128(1)), AdvertiseCallback::noop())
            .await
            .unwrap();
        assert!(matches!(
            handle.status().await.unwrap(),
            AdvertisingStatus::Retrying { attempt: 1, .. }
        ));
        assert!(!platform.is_advertising());

        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert!(matches!(
            handle.status().await.unwrap(),
            AdvertisingStatus::Advertising { .. }
        ));
        assert!(platform.is_advertising());

        handle.shutdown().await.unwrap();
        let manager = task.await.unwrap();
        assert!(!manager.is_server_open());
        assert_eq!(platform.calls().last(), Some(&PlatformCall::CloseServer));
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let (handle, task) = spawn(GattAdvertisingManager::new(MemoryPlatform::new(), NullHandler));

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.status().await,
            Err(BleError::ManagerStopped)
        ));
    }
}
