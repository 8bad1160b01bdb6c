//! Shared test helpers for luxbridge
//!
//! Provides an in-memory [`DeviceStore`] with the same observable
//! semantics as the production store, condition-based waiting (no
//! hardcoded sleeps), counting metrics, and port allocation helpers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use luxbridge_core::{
    DeadLetter, DeadLetterReason, Device, DevicePayload, DeviceStateUpdate, DeviceStore,
    DiscoveryResult, MappingRecord, Metrics, PollTarget, Result,
};

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Condition-based waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Find an available UDP port for testing
pub fn find_available_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

// ============================================================================
// Counting metrics
// ============================================================================

/// Metrics sink that counts into a map for assertions
#[derive(Default)]
pub struct CountingMetrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

impl Metrics for CountingMetrics {
    fn incr(&self, name: &str) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    fn observe(&self, _name: &str, _seconds: f64) {}
}

// ============================================================================
// In-memory device store
// ============================================================================

#[derive(Default)]
struct StoreState {
    devices: HashMap<String, Device>,
    mappings: Vec<MappingRecord>,
    queues: HashMap<String, VecDeque<DeviceStateUpdate>>,
    dead_letters: Vec<DeadLetter>,
    discoveries: Vec<DiscoveryResult>,
}

/// In-memory [`DeviceStore`] for tests
pub struct MemoryStore {
    state: Mutex<StoreState>,
    wake: Arc<Notify>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn insert_device(&self, device: Device) {
        self.state.lock().devices.insert(device.id.clone(), device);
    }

    pub fn set_mappings(&self, mappings: Vec<MappingRecord>) {
        self.state.lock().mappings = mappings;
    }

    pub fn get_device(&self, id: &str) -> Option<Device> {
        self.state.lock().devices.get(id).cloned()
    }

    pub fn dead_letters_for(&self, device_id: &str) -> Vec<DeadLetter> {
        self.state
            .lock()
            .dead_letters
            .iter()
            .filter(|d| d.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn queued_updates(&self, device_id: &str) -> Vec<DeviceStateUpdate> {
        self.state
            .lock()
            .queues
            .get(device_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every discovery result recorded, in arrival order
    pub fn discoveries(&self) -> Vec<DiscoveryResult> {
        self.state.lock().discoveries.clone()
    }

    pub fn total_enqueued(&self, device_id: &str) -> usize {
        self.queued_updates(device_id).len()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn mappings(&self) -> Result<Vec<MappingRecord>> {
        Ok(self.state.lock().mappings.clone())
    }

    async fn device(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.state.lock().devices.get(id).cloned())
    }

    async fn manual_probe_targets(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .devices
            .values()
            .filter(|d| d.manual && !d.ip.is_empty())
            .map(|d| (d.id.clone(), d.ip.clone()))
            .collect())
    }

    async fn poll_targets(&self) -> Result<Vec<PollTarget>> {
        let state = self.state.lock();
        let mut targets: Vec<PollTarget> = state
            .devices
            .values()
            .filter(|d| d.enabled && !d.ip.is_empty())
            .map(|d| PollTarget {
                id: d.id.clone(),
                ip: d.ip.clone(),
                port: d.port.unwrap_or(0),
                protocol: d.protocol.clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(targets)
    }

    async fn record_discovery(&self, result: DiscoveryResult) -> Result<()> {
        let mut state = self.state.lock();
        let now = SystemTime::now();
        state.discoveries.push(result.clone());

        match state.devices.get_mut(&result.id) {
            Some(device) => {
                // Rediscovery updates runtime facts; user edits survive
                device.ip = result.ip;
                device.discovered = true;
                device.last_seen = Some(now);
                if let Some(capabilities) = result.capabilities {
                    merge_capabilities(&mut device.capabilities, capabilities);
                }
            }
            None => {
                let mut device = Device::new(result.id.clone(), result.ip, result.protocol);
                device.discovered = true;
                device.manual = result.manual;
                device.first_seen = Some(now);
                device.last_seen = Some(now);
                if let Some(capabilities) = result.capabilities {
                    device.capabilities = capabilities;
                }
                state.devices.insert(result.id, device);
            }
        }
        Ok(())
    }

    async fn record_poll_success(&self, id: &str, poll_state: Option<serde_json::Value>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(id) {
            device.offline = false;
            device.poll_failure_count = 0;
            device.poll_last_success_at = Some(SystemTime::now());
            device.last_seen = Some(SystemTime::now());
            if poll_state.is_some() {
                device.poll_state = poll_state;
            }
        }
        Ok(())
    }

    async fn record_poll_failure(&self, id: &str, offline_threshold: u32) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(id) {
            device.poll_failure_count += 1;
            device.poll_last_failure_at = Some(SystemTime::now());
            if device.poll_failure_count >= offline_threshold {
                device.offline = true;
            }
        }
        Ok(())
    }

    async fn enqueue_state(&self, update: DeviceStateUpdate) -> Result<()> {
        self.state
            .lock()
            .queues
            .entry(update.device_id.clone())
            .or_default()
            .push_back(update);
        self.wake.notify_waiters();
        Ok(())
    }

    async fn pending_device_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn pop_next_for(&self, device_id: &str) -> Result<Option<DeviceStateUpdate>> {
        Ok(self
            .state
            .lock()
            .queues
            .get_mut(device_id)
            .and_then(VecDeque::pop_front))
    }

    async fn mark_stale(&self, stale_after: Duration) -> Result<()> {
        let mut state = self.state.lock();
        let now = SystemTime::now();
        for device in state.devices.values_mut() {
            if device.manual {
                continue;
            }
            let stale = match device.last_seen {
                Some(seen) => now
                    .duration_since(seen)
                    .map(|age| age > stale_after)
                    .unwrap_or(false),
                None => false,
            };
            if stale {
                device.discovered = false;
            }
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        device_id: &str,
        payload: DevicePayload,
        reason: DeadLetterReason,
    ) -> Result<()> {
        self.state.lock().dead_letters.push(DeadLetter {
            device_id: device_id.to_string(),
            payload,
            reason,
            first_seen: SystemTime::now(),
            attempts: 0,
        });
        Ok(())
    }

    fn wake_handle(&self) -> Option<Arc<Notify>> {
        Some(self.wake.clone())
    }
}

fn merge_capabilities(target: &mut serde_json::Value, incoming: serde_json::Value) {
    match (target.as_object_mut(), incoming) {
        (Some(target_map), serde_json::Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                target_map.insert(key, value);
            }
        }
        (_, incoming) => *target = incoming,
    }
}
