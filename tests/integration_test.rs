//! Integration tests for the daemon flow on the in-memory platform.

use std::time::Duration;

use car_trust_ble::bluetooth::ble_constants::{CLIENT_WRITE_UUID, SERVER_WRITE_UUID};
use car_trust_ble::bluetooth::{
    spawn, AdvertiseCallback, AdvertisingStatus, ConnectionState, DeviceAddress,
    GattAdvertisingManager, GattServerEvent, GattStatus, MemoryPlatform, PlatformCall,
    ReadRequest, WriteRequest,
};
use car_trust_ble::config::Config;
use car_trust_ble::events::TrustSessionHandler;
use car_trust_ble::state::{AdvertisingState, AppState};

const PHONE: DeviceAddress = DeviceAddress([0xD1, 0x00, 0x00, 0x00, 0x00, 0x01]);

fn advertiser_requests(platform: &MemoryPlatform) -> usize {
    platform
        .calls()
        .iter()
        .filter(|c| matches!(c, PlatformCall::GetAdvertiser { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_advertiser_gives_up_after_five_retries() {
    let platform = MemoryPlatform::new().advertiser_never_available();
    let config = Config::default();
    let state = AppState::new();
    let manager = GattAdvertisingManager::new(platform.clone(), TrustSessionHandler::new(state))
        .with_retry_policy(config.retry_policy());
    let (handle, task) = spawn(manager);

    handle
        .start_advertising(config.build_service(), AdvertiseCallback::noop())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(
        handle.status().await.unwrap(),
        AdvertisingStatus::GaveUp {
            session: 1,
            attempts: 5
        }
    );
    assert_eq!(advertiser_requests(&platform), 6);
    assert!(!platform.is_advertising());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[advertising]\nretry_limit = 2\nretry_interval_ms = 50\n",
    )
    .unwrap();
    let config = Config::load_from(&path).unwrap();

    let platform = MemoryPlatform::new().advertiser_never_available();
    let manager =
        GattAdvertisingManager::new(platform.clone(), TrustSessionHandler::new(AppState::new()))
            .with_retry_policy(config.retry_policy());
    let (handle, task) = spawn(manager);

    handle
        .start_advertising(config.build_service(), AdvertiseCallback::noop())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        handle.status().await.unwrap(),
        AdvertisingStatus::GaveUp {
            session: 1,
            attempts: 2
        }
    );
    assert_eq!(advertiser_requests(&platform), 3);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_phone_session() {
    let platform = MemoryPlatform::new();
    let config = Config::default();
    let state = AppState::new();
    let manager =
        GattAdvertisingManager::new(platform.clone(), TrustSessionHandler::new(state.clone()));
    let (handle, task) = spawn(manager);

    let service = config.build_service();
    let client_write = service.characteristic(CLIENT_WRITE_UUID).unwrap().clone();
    let server_write = service.characteristic(SERVER_WRITE_UUID).unwrap().clone();
    server_write.set_value(b"challenge".to_vec());

    let state_adv = state.clone();
    handle
        .start_advertising(
            service,
            AdvertiseCallback::new(move |result| state_adv.record_advertise_result(&result)),
        )
        .await
        .unwrap();

    handle
        .dispatch(GattServerEvent::ConnectionStateChanged {
            device: PHONE,
            status: GattStatus::Success,
            new_state: ConnectionState::Connected,
        })
        .await
        .unwrap();
    handle
        .dispatch(GattServerEvent::CharacteristicWriteRequest(WriteRequest {
            device: PHONE,
            request_id: 1,
            characteristic: client_write.clone(),
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: b"token".to_vec(),
        }))
        .await
        .unwrap();
    handle
        .dispatch(GattServerEvent::CharacteristicReadRequest(ReadRequest {
            device: PHONE,
            request_id: 2,
            offset: 0,
            characteristic: server_write.clone(),
        }))
        .await
        .unwrap();
    handle
        .notify_characteristic_changed(PHONE, server_write.clone(), false)
        .await
        .unwrap();

    // Round trip so every command above has been handled.
    handle.status().await.unwrap();

    assert_eq!(state.get_advertising(), AdvertisingState::Advertising);
    assert!(state.is_connected(PHONE));
    assert_eq!(client_write.value(), b"token");
    assert_eq!(
        state.get_last_write().map(|a| a.characteristic),
        Some(CLIENT_WRITE_UUID)
    );
    assert_eq!(
        state.get_last_read().map(|a| a.characteristic),
        Some(SERVER_WRITE_UUID)
    );

    let responses: Vec<_> = platform
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            PlatformCall::SendResponse {
                request_id, value, ..
            } => Some((request_id, value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        responses,
        vec![(1, b"token".to_vec()), (2, b"challenge".to_vec())]
    );
    assert!(platform
        .calls()
        .contains(&PlatformCall::NotifyCharacteristicChanged {
            device: PHONE,
            characteristic: SERVER_WRITE_UUID,
            value: b"challenge".to_vec(),
            confirm: false,
        }));

    handle
        .dispatch(GattServerEvent::ConnectionStateChanged {
            device: PHONE,
            status: GattStatus::Success,
            new_state: ConnectionState::Disconnected,
        })
        .await
        .unwrap();
    handle.shutdown().await.unwrap();
    let manager = task.await.unwrap();

    assert!(!state.is_connected(PHONE));
    assert!(!manager.is_server_open());
    assert_eq!(platform.open_servers(), 0);
}

#[tokio::test]
async fn test_cleanup_then_restart() {
    let platform = MemoryPlatform::new().with_connected_devices(vec![PHONE]);
    let config = Config::default();
    let manager =
        GattAdvertisingManager::new(platform.clone(), TrustSessionHandler::new(AppState::new()));
    let (handle, task) = spawn(manager);

    handle
        .start_advertising(config.build_service(), AdvertiseCallback::noop())
        .await
        .unwrap();
    handle.cleanup().await.unwrap();

    assert_eq!(handle.status().await.unwrap(), AdvertisingStatus::Idle);
    assert_eq!(platform.open_servers(), 0);
    assert!(platform
        .calls()
        .contains(&PlatformCall::CancelConnection(PHONE)));

    handle
        .start_advertising(config.build_service(), AdvertiseCallback::noop())
        .await
        .unwrap();

    assert_eq!(
        handle.status().await.unwrap(),
        AdvertisingStatus::Advertising { session: 2 }
    );
    assert_eq!(platform.open_servers(), 1);
    assert_eq!(
        platform.registered_services(),
        vec![config.service.uuid]
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
