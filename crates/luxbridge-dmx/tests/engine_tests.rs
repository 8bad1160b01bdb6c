//! Mapping engine integration tests
//!
//! Drive the engine with synthetic frames against the in-memory store
//! and observe what reaches the device queues: priority dominance,
//! change detection, debounce collapse, and reload on mapping events.

use std::sync::Arc;
use std::time::Duration;

use luxbridge_core::{
    BridgeConfig, Color, DeviceStore, DmxFrame, EventBus, MappingCapabilities, MappingKind,
    MappingRecord, MetricsHandle, NoopMetrics, SourceProtocol, SystemEvent, Template,
    ARTNET_FIXED_PRIORITY, DMX_CHANNELS, EVENT_MAPPING_CREATED,
};
use luxbridge_dmx::MappingEngine;
use luxbridge_test_utils::{wait_for, MemoryStore, DEFAULT_CHECK_INTERVAL};

const WAIT: Duration = Duration::from_secs(2);

fn rgb_mapping(device_id: &str, universe: u16, channel: u16) -> MappingRecord {
    MappingRecord {
        id: 1,
        device_id: device_id.to_string(),
        universe,
        channel,
        length: 3,
        kind: MappingKind::Range,
        field: None,
        template: Some(Template::Rgb),
        allow_overlap: false,
        capabilities: MappingCapabilities {
            gamma: Some(1.0),
            dimmer: Some(1.0),
            ..Default::default()
        },
    }
}

fn frame(
    universe: u16,
    values: &[u8],
    protocol: SourceProtocol,
    priority: u8,
    source_id: &str,
) -> DmxFrame {
    let mut data = [0u8; DMX_CHANNELS];
    data[..values.len()].copy_from_slice(values);
    DmxFrame::new(universe, data, 0, protocol, priority, source_id).unwrap()
}

async fn engine_with(
    store: &Arc<MemoryStore>,
    config: BridgeConfig,
) -> Arc<MappingEngine> {
    let metrics: MetricsHandle = Arc::new(NoopMetrics);
    let engine = Arc::new(MappingEngine::new(
        Arc::new(config.normalise()),
        store.clone() as Arc<dyn DeviceStore>,
        metrics,
    ));
    engine.clone().start(None).await.unwrap();
    engine
}

fn fast_config() -> BridgeConfig {
    serde_json::from_str(r#"{"debounce_seconds": 0.01}"#).unwrap()
}

#[tokio::test]
async fn test_artnet_rgb_fade_enqueues_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 0, 1)]);
    let engine = engine_with(&store, fast_config()).await;

    engine
        .process_frame(frame(
            0,
            &[10, 20, 30],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;

    let drained = {
        let store = store.clone();
        wait_for(
            move || {
                let store = store.clone();
                async move { store.total_enqueued("dev-a") == 1 }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    assert!(drained, "update never reached the queue");

    let updates = store.queued_updates("dev-a");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].payload.color, Some(Color::rgb(10, 20, 30)));

    engine.stop().await;
}

#[tokio::test]
async fn test_identical_frames_enqueue_once() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 0, 1)]);
    let engine = engine_with(&store, fast_config()).await;

    for _ in 0..5 {
        engine
            .process_frame(frame(
                0,
                &[99, 0, 0],
                SourceProtocol::Artnet,
                ARTNET_FIXED_PRIORITY,
                "artnet-1",
            ))
            .await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        store.total_enqueued("dev-a"),
        1,
        "identical payloads must deduplicate"
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_debounce_collapses_to_last_value() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 0, 1)]);
    // Wide debounce so both frames land inside one window
    let engine = engine_with(
        &store,
        serde_json::from_str(r#"{"debounce_seconds": 0.1}"#).unwrap(),
    )
    .await;

    engine
        .process_frame(frame(
            0,
            &[1, 1, 1],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;
    engine
        .process_frame(frame(
            0,
            &[2, 2, 2],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let updates = store.queued_updates("dev-a");
    assert_eq!(updates.len(), 1, "window collapses to a single enqueue");
    assert_eq!(updates[0].payload.color, Some(Color::rgb(2, 2, 2)));

    engine.stop().await;
}

#[tokio::test]
async fn test_sacn_overrides_artnet_then_ages_out() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 1, 1)]);
    let engine = engine_with(&store, fast_config()).await;

    // ArtNet red wins alone
    engine
        .process_frame(frame(
            1,
            &[255, 0, 0],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;

    // sACN green at default priority takes over; backdate it so it is
    // already past the data-loss timeout for the next arrival.
    let mut green = frame(1, &[0, 255, 0], SourceProtocol::Sacn, 100, "sacn-1");
    green.timestamp -= Duration::from_secs(3);
    engine.process_frame(green).await;

    let got_green = {
        let store = store.clone();
        wait_for(
            move || {
                let store = store.clone();
                async move {
                    store
                        .queued_updates("dev-a")
                        .last()
                        .map(|u| u.payload.color == Some(Color::rgb(0, 255, 0)))
                        .unwrap_or(false)
                }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    assert!(got_green, "sACN payload must override ArtNet");

    // With the sACN source stale, ArtNet reappears as winner
    engine
        .process_frame(frame(
            1,
            &[255, 0, 0],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;

    let got_red = {
        let store = store.clone();
        wait_for(
            move || {
                let store = store.clone();
                async move {
                    store
                        .queued_updates("dev-a")
                        .last()
                        .map(|u| u.payload.color == Some(Color::rgb(255, 0, 0)))
                        .unwrap_or(false)
                }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    assert!(got_red, "ArtNet must win again after the sACN source ages out");

    engine.stop().await;
}

#[tokio::test]
async fn test_lower_priority_source_never_produces_updates() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 0, 1)]);
    let engine = engine_with(&store, fast_config()).await;

    engine
        .process_frame(frame(0, &[0, 255, 0], SourceProtocol::Sacn, 100, "sacn-1"))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let baseline = store.total_enqueued("dev-a");

    // A burst of lower-priority ArtNet frames with different colours
    for value in [10u8, 20, 30] {
        engine
            .process_frame(frame(
                0,
                &[value, 0, 0],
                SourceProtocol::Artnet,
                ARTNET_FIXED_PRIORITY,
                "artnet-1",
            ))
            .await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        store.total_enqueued("dev-a"),
        baseline,
        "losing source leaked device updates"
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_mapping_event_triggers_reload() {
    let store = Arc::new(MemoryStore::new());
    let metrics: MetricsHandle = Arc::new(NoopMetrics);
    let bus = EventBus::new();
    let engine = Arc::new(MappingEngine::new(
        Arc::new(fast_config().normalise()),
        store.clone() as Arc<dyn DeviceStore>,
        metrics,
    ));
    engine.clone().start(Some(&bus)).await.unwrap();
    assert!(engine.mapped_universes().is_empty());

    store.set_mappings(vec![rgb_mapping("dev-a", 4, 1)]);
    bus.publish(SystemEvent::new(
        EVENT_MAPPING_CREATED,
        serde_json::json!({"id": 1}),
    ));

    let reloaded = {
        let engine = engine.clone();
        wait_for(
            move || {
                let engine = engine.clone();
                async move { engine.mapped_universes() == vec![4] }
            },
            DEFAULT_CHECK_INTERVAL,
            WAIT,
        )
        .await
    };
    assert!(reloaded, "mapping event did not trigger a reload");

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_flushes_pending_updates() {
    let store = Arc::new(MemoryStore::new());
    store.set_mappings(vec![rgb_mapping("dev-a", 0, 1)]);
    // Debounce far longer than the test so only the flush can enqueue
    let engine = engine_with(
        &store,
        serde_json::from_str(r#"{"debounce_seconds": 30.0}"#).unwrap(),
    )
    .await;

    engine
        .process_frame(frame(
            0,
            &[5, 6, 7],
            SourceProtocol::Artnet,
            ARTNET_FIXED_PRIORITY,
            "artnet-1",
        ))
        .await;
    assert_eq!(store.total_enqueued("dev-a"), 0);

    engine.stop().await;
    assert_eq!(
        store.total_enqueued("dev-a"),
        1,
        "stop must drain pending payloads through the store"
    );
}
