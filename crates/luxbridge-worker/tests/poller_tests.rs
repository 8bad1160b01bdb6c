//! Poller worker integration tests

use std::sync::Arc;
use std::time::Duration;

use luxbridge_core::{
    BridgeConfig, Device, DeviceStore, MetricsHandle, NoopMetrics,
};
use luxbridge_protocol::HandlerRegistry;
use luxbridge_test_utils::{find_available_udp_port, wait_for, MemoryStore, DEFAULT_CHECK_INTERVAL};
use luxbridge_worker::DevicePollerService;

const WAIT: Duration = Duration::from_secs(5);

fn poll_config(offline_threshold: u32) -> Arc<BridgeConfig> {
    let config: BridgeConfig = serde_json::from_str(&format!(
        r#"{{
            "device_poll_enabled": true,
            "device_poll_interval": 0.02,
            "device_poll_timeout": 0.1,
            "device_poll_offline_threshold": {offline_threshold},
            "device_poll_rate_per_second": 1000.0,
            "device_poll_rate_burst": 50.0,
            "device_poll_batch_size": 10,
            "device_poll_backoff_base": 0.01,
            "device_poll_backoff_max": 0.05
        }}"#
    ))
    .unwrap();
    Arc::new(config.normalise())
}

fn poller(store: &Arc<MemoryStore>, config: Arc<BridgeConfig>) -> DevicePollerService {
    let metrics: MetricsHandle = Arc::new(NoopMetrics);
    DevicePollerService::new(
        config,
        store.clone() as Arc<dyn DeviceStore>,
        Arc::new(HandlerRegistry::builtin()),
        metrics,
    )
}

#[tokio::test]
async fn test_unresponsive_device_goes_offline() {
    let store = Arc::new(MemoryStore::new());
    let mut device = Device::new("dev-dark", "127.0.0.1", "govee");
    // A port with nothing listening behind it
    device.port = Some(find_available_udp_port());
    store.insert_device(device);

    let mut service = poller(&store, poll_config(2));
    service.start().await.unwrap();

    let offline = {
        let store = store.clone();
        wait_for(
            move || {
                let store = store.clone();
                async move {
                    store
                        .get_device("dev-dark")
                        .map(|d| d.offline && d.poll_failure_count >= 2)
                        .unwrap_or(false)
                }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    service.stop().await;

    assert!(offline, "device never transitioned offline");
    let device = store.get_device("dev-dark").unwrap();
    assert!(device.poll_last_failure_at.is_some());
}

#[tokio::test]
async fn test_responding_device_stays_online_with_state() {
    // Fake Govee device answering devStatus
    let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = responder.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let Ok((_, from)) = responder.recv_from(&mut buf).await else {
                break;
            };
            let reply = serde_json::json!({
                "msg": {"cmd": "devStatus", "data": {"onOff": 1, "brightness": 64}}
            });
            let _ = responder.send_to(reply.to_string().as_bytes(), from).await;
        }
    });

    let store = Arc::new(MemoryStore::new());
    let mut device = Device::new("dev-live", "127.0.0.1", "govee");
    device.port = Some(port);
    // Start from an offline state to verify recovery
    device.offline = true;
    device.poll_failure_count = 5;
    store.insert_device(device);

    let mut service = poller(&store, poll_config(2));
    service.start().await.unwrap();

    let recovered = {
        let store = store.clone();
        wait_for(
            move || {
                let store = store.clone();
                async move {
                    store
                        .get_device("dev-live")
                        .map(|d| !d.offline && d.poll_state.is_some())
                        .unwrap_or(false)
                }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    service.stop().await;

    assert!(recovered, "successful poll must clear the offline flag");
    let device = store.get_device("dev-live").unwrap();
    assert_eq!(device.poll_failure_count, 0);
    assert_eq!(device.poll_state.unwrap()["brightness"], 64);
}

#[tokio::test]
async fn test_poller_disabled_by_default() {
    let store = Arc::new(MemoryStore::new());
    let config: BridgeConfig = serde_json::from_str("{}").unwrap();
    let mut service = poller(&store, Arc::new(config.normalise()));
    // Disabled config starts as a no-op
    service.start().await.unwrap();
    service.stop().await;
}
