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

//! Car Trust BLE peripheral daemon.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use car_trust_ble::bluetooth::{
    self, AdvertiseCallback, BlePlatform, GattAdvertisingManager, GattServerEvent,
};
use car_trust_ble::config::Config;
use car_trust_ble::events::TrustSessionHandler;
use car_trust_ble::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("car_trust_ble=info".parse()?),
        )
        .init();

    info!("Starting Car Trust BLE v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded from {}", Config::path().display());

    run(&config, AppState::new()).await
}

#[cfg(feature = "bluez")]
async fn run(config: &Config, state: Arc<AppState>) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<GattServerEvent>();
    let platform =
        bluetooth::BluezPlatform::new(config.bluetooth.adapter.as_deref(), event_tx).await?;
    platform.set_name(&config.bluetooth.device_name).await?;
    serve(platform, config, state, event_rx).await
}

#[cfg(not(feature = "bluez"))]
async fn run(config: &Config, state: Arc<AppState>) -> Result<()> {
    tracing::warn!("Built without the `bluez` feature; using the in-memory platform");
    // Nothing produces platform events in memory.
    let (_, event_rx) = mpsc::unbounded_channel::<GattServerEvent>();
    serve(bluetooth::MemoryPlatform::new(), config, state, event_rx).await
}

/// Run the manager on `platform` until Ctrl+C.
async fn serve<P>(
    platform: P,
    config: &Config,
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<GattServerEvent>,
) -> Result<()>
where
    P: BlePlatform + 'static,
{
    let manager = GattAdvertisingManager::new(platform, TrustSessionHandler::new(state.clone()))
        .with_retry_policy(config.retry_policy())
        .with_advertise_settings(
            config.advertise_settings(),
            config.advertising.include_device_name,
        );
    let (handle, task) = bluetooth::spawn(manager);

    // Forward platform events to the manager task
    let forward = handle.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if forward.dispatch(event).await.is_err() {
                break;
            }
        }
    });

    let state_adv = state.clone();
    let callback = AdvertiseCallback::new(move |result| {
        info!("Advertise result: {:?}", result);
        state_adv.record_advertise_result(&result);
    });

    handle
        .start_advertising(config.build_service(), callback.clone())
        .await?;
    info!(
        "Ready. Advertising service {} as '{}'",
        config.service.uuid, config.bluetooth.device_name
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.stop_advertising(callback).await?;
    state.set_advertising_stopped();
    handle.shutdown().await?;
    if let Err(e) = task.await {
        error!("GATT manager task failed: {}", e);
    }

    info!("Car Trust BLE stopped");
    Ok(())
}
