//! DMX to device mapping engine
//!
//! Receives frames from every ingress, applies priority merging, expands
//! the winning universe's compiled mappings into abstract device
//! payloads, and enqueues them through the store with change detection
//! and a trailing per-device debounce.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use luxbridge_core::{
    BridgeConfig, Color, DevicePayload, DeviceStateUpdate, DeviceStore, DmxFrame, EventBus,
    MappingField, MappingKind, MappingRecord, MetricsHandle, Subscription, WhitePolicy,
    DMX_CHANNELS, EVENT_MAPPING_CREATED, EVENT_MAPPING_DELETED, EVENT_MAPPING_UPDATED,
};

use crate::error::Result;
use crate::merger::PriorityMerger;

/// Gamma exponent bounds for per-mapping overrides
const GAMMA_MIN: f64 = 0.1;
const GAMMA_MAX: f64 = 5.0;

/// Per-channel shaping: `round(dimmer * 255 * (v/255)^gamma)`
fn apply_gamma_dimmer(value: u8, gamma: f64, dimmer: f64) -> f64 {
    dimmer * 255.0 * (value as f64 / 255.0).powf(gamma)
}

/// One mapping record compiled against the current device table
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    pub device_id: String,
    /// 1-based start channel
    pub channel: u16,
    /// Resolved channel order
    pub fields: Vec<MappingField>,
    pub gamma: f64,
    pub dimmer: f64,
    pub white_policy: WhitePolicy,
    /// Device-reported kelvin range; kelvin sliders are skipped without it
    pub color_temp_range: Option<(u16, u16)>,
}

impl CompiledMapping {
    /// Validate and resolve a record. `Err` carries the reason for the
    /// skip log; the rest of the set continues loading.
    pub fn compile(
        record: &MappingRecord,
        color_temp_range: Option<(u16, u16)>,
    ) -> std::result::Result<Self, String> {
        if record.channel == 0 || record.channel > DMX_CHANNELS as u16 {
            return Err(format!("channel {} out of range", record.channel));
        }
        if record.length == 0 {
            return Err("length must be at least 1".to_string());
        }

        let capabilities = &record.capabilities;
        let fields: Vec<MappingField> = match record.kind {
            MappingKind::Discrete => {
                let Some(field) = record.field else {
                    return Err("discrete mapping missing field".to_string());
                };
                if record.length != 1 {
                    return Err("discrete mapping must have length 1".to_string());
                }
                vec![field]
            }
            MappingKind::Range => {
                if let Some(order) = capabilities.order.as_ref().filter(|o| !o.is_empty()) {
                    order.clone()
                } else {
                    let Some(template) = capabilities.mode.or(record.template) else {
                        return Err("range mapping missing template".to_string());
                    };
                    template.fields().to_vec()
                }
            }
        };

        let required = fields.len() as u16;
        if record.length < required {
            return Err(format!(
                "length {} below required channels {required}",
                record.length
            ));
        }
        if record.channel - 1 + required > DMX_CHANNELS as u16 {
            return Err(format!(
                "channels {}..{} exceed the universe",
                record.channel,
                record.channel - 1 + required
            ));
        }

        Ok(Self {
            device_id: record.device_id.clone(),
            channel: record.channel,
            fields,
            gamma: capabilities.gamma.unwrap_or(1.0).clamp(GAMMA_MIN, GAMMA_MAX),
            dimmer: capabilities.dimmer.unwrap_or(1.0).clamp(0.0, 1.0),
            white_policy: capabilities.white_policy.unwrap_or_default(),
            color_temp_range,
        })
    }

    /// Read this mapping's slice of the universe and assemble a payload.
    /// Returns `None` when nothing routable came out (e.g. a kelvin
    /// slider without a device range).
    pub fn apply(&self, data: &[u8; DMX_CHANNELS]) -> Option<DevicePayload> {
        let start = (self.channel - 1) as usize;

        let mut r = None;
        let mut g = None;
        let mut b = None;
        let mut w = None;
        let mut master = None;
        let mut brightness = None;
        let mut kelvin_raw = None;

        for (offset, field) in self.fields.iter().enumerate() {
            let value = data[start + offset];
            match field {
                MappingField::R => r = Some(value),
                MappingField::G => g = Some(value),
                MappingField::B => b = Some(value),
                MappingField::W => w = Some(value),
                // Amber is consumed but has no payload slot
                MappingField::A => {}
                MappingField::Dimmer => master = Some(value),
                MappingField::Brightness => brightness = Some(value),
                MappingField::Kelvin => kelvin_raw = Some(value),
            }
        }

        let master_scale = master.map_or(1.0, |m| m as f64 / 255.0);
        let shape = |value: u8| -> u8 {
            (apply_gamma_dimmer(value, self.gamma, self.dimmer) * master_scale)
                .round()
                .clamp(0.0, 255.0) as u8
        };

        let mut payload = DevicePayload::default();

        let has_color = r.is_some() || g.is_some() || b.is_some();
        if has_color {
            payload.color = Some(Color {
                r: shape(r.unwrap_or(0)),
                g: shape(g.unwrap_or(0)),
                b: shape(b.unwrap_or(0)),
                w: w.map(|value| match self.white_policy {
                    WhitePolicy::PerChannel => shape(value),
                    WhitePolicy::PassThrough => value,
                }),
            });
        }

        if let Some(value) = brightness {
            payload.brightness = Some(value);
        } else if let (Some(value), false) = (master, has_color) {
            // A lone master channel drives brightness directly
            payload.brightness = Some(value);
        }

        if let Some(raw) = kelvin_raw {
            // Never guess a kelvin range the device did not report
            if let Some((min, max)) = self.color_temp_range {
                let kelvin = min as f64 + (raw as f64 / 255.0) * (max as f64 - min as f64);
                payload.color_temp = Some(kelvin.round() as u16);
            }
        }

        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }
}

#[derive(Default)]
struct DebounceState {
    last_payloads: HashMap<String, DevicePayload>,
    pending: HashMap<String, DeviceStateUpdate>,
    timers: HashMap<String, JoinHandle<()>>,
}

/// Change detection plus trailing per-device debounce. Owns the timer
/// tasks, so it sits behind its own `Arc` inside the engine.
struct Debouncer {
    store: Arc<dyn DeviceStore>,
    metrics: MetricsHandle,
    debounce: Duration,
    sample_rate: f64,
    state: Mutex<DebounceState>,
}

impl Debouncer {
    /// Schedule an update. Concurrent updates for the same device within
    /// the window collapse: last value wins.
    fn schedule(this: &Arc<Self>, update: DeviceStateUpdate) {
        let mut state = this.state.lock();

        if state.last_payloads.get(&update.device_id) == Some(&update.payload) {
            if fastrand::f64() <= this.sample_rate {
                debug!(device_id = %update.device_id, "skipping duplicate device update");
            }
            return;
        }

        state
            .last_payloads
            .insert(update.device_id.clone(), update.payload.clone());
        state.pending.insert(update.device_id.clone(), update.clone());
        this.metrics.incr("device_updates_scheduled");

        if !state.timers.contains_key(&update.device_id) {
            let handle = tokio::spawn(this.clone().flush_after(update.device_id.clone()));
            state.timers.insert(update.device_id, handle);
        }
    }

    async fn flush_after(self: Arc<Self>, device_id: String) {
        tokio::time::sleep(self.debounce).await;

        let update = {
            let mut state = self.state.lock();
            state.timers.remove(&device_id);
            state.pending.remove(&device_id)
        };
        if let Some(update) = update {
            match self.store.enqueue_state(update).await {
                Ok(()) => debug!(device_id = %device_id, "enqueued device update"),
                Err(e) => warn!(device_id = %device_id, error = %e, "enqueue failed"),
            }
        }
    }

    /// Cancel timers and drain everything pending through the store
    async fn flush_all(&self) {
        let (timers, pending) = {
            let mut state = self.state.lock();
            (
                state.timers.drain().collect::<Vec<_>>(),
                state.pending.drain().collect::<Vec<_>>(),
            )
        };
        for (_, handle) in timers {
            handle.abort();
        }
        for (_, update) in pending {
            if let Err(e) = self.store.enqueue_state(update).await {
                warn!(error = %e, "failed to flush pending update at shutdown");
            }
        }
    }
}

type Snapshot = HashMap<u16, Vec<CompiledMapping>>;

/// The mapping service: merger, compiled snapshot, debounce state
pub struct MappingEngine {
    config: Arc<BridgeConfig>,
    store: Arc<dyn DeviceStore>,
    metrics: MetricsHandle,
    merger: Mutex<PriorityMerger>,
    snapshot: RwLock<Arc<Snapshot>>,
    debouncer: Arc<Debouncer>,
    reload_lock: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MappingEngine {
    pub fn new(
        config: Arc<BridgeConfig>,
        store: Arc<dyn DeviceStore>,
        metrics: MetricsHandle,
    ) -> Self {
        let debouncer = Arc::new(Debouncer {
            store: store.clone(),
            metrics: metrics.clone(),
            debounce: config.debounce(),
            sample_rate: config.noisy_log_sample_rate,
            state: Mutex::new(DebounceState::default()),
        });
        Self {
            config,
            store,
            metrics,
            merger: Mutex::new(PriorityMerger::new()),
            snapshot: RwLock::new(Arc::new(Snapshot::new())),
            debouncer,
            reload_lock: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Load the initial snapshot and subscribe to mapping-change events
    pub async fn start(self: Arc<Self>, bus: Option<&EventBus>) -> Result<()> {
        self.reload().await?;

        if self.snapshot.read().is_empty() {
            warn!("no DMX mappings configured");
        }

        if let Some(bus) = bus {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            {
                let mut subscriptions = self.subscriptions.lock();
                for event_type in [
                    EVENT_MAPPING_CREATED,
                    EVENT_MAPPING_UPDATED,
                    EVENT_MAPPING_DELETED,
                ] {
                    let tx = tx.clone();
                    subscriptions.push(bus.subscribe(event_type, move |event| {
                        let _ = tx.send(event.event_type.clone());
                    }));
                }
            }
            drop(tx);

            let engine = self.clone();
            tokio::spawn(async move {
                while let Some(event_type) = rx.recv().await {
                    info!(event = %event_type, "mapping changed, reloading");
                    if let Err(e) = engine.reload().await {
                        warn!(error = %e, "mapping reload failed");
                    }
                }
            });
            info!("subscribed to mapping events for automatic reload");
        }

        let snapshot = self.snapshot.read().clone();
        info!(
            universes = ?sorted_keys(&snapshot),
            mapping_count = snapshot.values().map(Vec::len).sum::<usize>(),
            "DMX mapping engine started"
        );
        Ok(())
    }

    /// Drop subscriptions, cancel timers, and flush pending payloads
    /// through the store so nothing observed is lost across restart.
    pub async fn stop(&self) {
        self.subscriptions.lock().clear();
        self.debouncer.flush_all().await;
        info!("DMX mapping engine stopped");
    }

    /// Main entry point for every ingress protocol
    pub async fn process_frame(&self, frame: DmxFrame) {
        let universe = frame.universe;
        let sequence = frame.sequence;
        let protocol = frame.source_protocol;

        // Winner evaluation is serialised; the lock never crosses an await
        let winning = { self.merger.lock().merge(frame) };
        let Some(frame) = winning else {
            return;
        };

        self.metrics.incr_labeled("dmx_frames", "accepted");

        let snapshot = self.snapshot.read().clone();
        let Some(mappings) = snapshot.get(&universe) else {
            if fastrand::f64() <= self.config.noisy_log_sample_rate {
                debug!(universe, %protocol, sequence, "no mapping for DMX universe");
            }
            return;
        };

        let context_id = if self.config.trace_context_ids
            && fastrand::f64() <= self.config.trace_context_sample_rate
        {
            Some(format!(
                "dmx-{protocol}-{universe}-{sequence}-{}",
                uuid::Uuid::new_v4().simple()
            ))
        } else {
            None
        };

        let mut updates = Vec::new();
        for mapping in mappings {
            if let Some(payload) = mapping.apply(&frame.data) {
                updates.push(DeviceStateUpdate {
                    device_id: mapping.device_id.clone(),
                    payload,
                    context_id: context_id.clone(),
                });
            }
        }

        if updates.is_empty() {
            if fastrand::f64() <= self.config.noisy_log_sample_rate {
                debug!(universe, %protocol, sequence, "DMX frame generated no device updates");
            }
            return;
        }

        for update in updates {
            Debouncer::schedule(&self.debouncer, update);
        }
    }

    /// Rebuild the compiled snapshot from the store. Readers see either
    /// the old or the new snapshot, never a partial one.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        let records = self.store.mappings().await?;
        let record_count = records.len();
        let mut universes = Snapshot::new();

        for record in records {
            let color_temp_range = match self.store.device(&record.device_id).await {
                Ok(Some(device)) => device.color_temp_range(),
                _ => None,
            };
            match CompiledMapping::compile(&record, color_temp_range) {
                Ok(compiled) => universes
                    .entry(record.universe)
                    .or_insert_with(Vec::new)
                    .push(compiled),
                Err(reason) => warn!(
                    device_id = %record.device_id,
                    universe = record.universe,
                    channel = record.channel,
                    %reason,
                    "skipping mapping"
                ),
            }
        }

        let universe_list = sorted_keys(&universes);
        *self.snapshot.write() = Arc::new(universes);

        info!(universes = ?universe_list, mapping_count = record_count, "reloaded DMX mappings");
        Ok(())
    }

    /// Universes that currently have live sources
    pub fn active_universes(&self) -> Vec<u16> {
        self.merger.lock().active_universes()
    }

    /// Universes with at least one compiled mapping
    pub fn mapped_universes(&self) -> Vec<u16> {
        sorted_keys(&self.snapshot.read())
    }
}

fn sorted_keys(snapshot: &Snapshot) -> Vec<u16> {
    let mut keys: Vec<u16> = snapshot.keys().copied().collect();
    keys.sort_unstable();
    keys
}
