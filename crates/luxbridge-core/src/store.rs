//! The persistence contract consumed by the core
//!
//! The concrete store (SQLite behind a serialised writer in the full
//! deployment) lives outside the core; everything the data plane needs is
//! expressed here. All operations are async because the store is a
//! transactional boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::device::{
    DeadLetterReason, Device, DeviceStateUpdate, DiscoveryResult, PollTarget,
};
use crate::error::Result;
use crate::mapping::MappingRecord;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// All persisted mapping records
    async fn mappings(&self) -> Result<Vec<MappingRecord>>;

    /// Look up one device by id
    async fn device(&self, id: &str) -> Result<Option<Device>>;

    /// `(device_id, ip)` pairs for manual devices worth a unicast probe
    async fn manual_probe_targets(&self) -> Result<Vec<(String, String)>>;

    /// Devices eligible for liveness polling
    async fn poll_targets(&self) -> Result<Vec<PollTarget>>;

    /// Fold a discovery response into the device table. Idempotent by
    /// device id; user-edited fields survive rediscovery.
    async fn record_discovery(&self, result: DiscoveryResult) -> Result<()>;

    /// Successful poll: clears offline, stores the normalised state
    async fn record_poll_success(&self, id: &str, state: Option<serde_json::Value>) -> Result<()>;

    /// Failed poll: increments the failure count and flips the device
    /// offline once it reaches `offline_threshold`.
    async fn record_poll_failure(&self, id: &str, offline_threshold: u32) -> Result<()>;

    /// Append a state update to the device's send queue
    async fn enqueue_state(&self, update: DeviceStateUpdate) -> Result<()>;

    /// Devices with at least one queued update
    async fn pending_device_ids(&self) -> Result<Vec<String>>;

    /// Pop the oldest queued update for a device
    async fn pop_next_for(&self, device_id: &str) -> Result<Option<DeviceStateUpdate>>;

    /// Flag devices not seen within `stale_after` as no longer discovered
    async fn mark_stale(&self, stale_after: Duration) -> Result<()>;

    /// Park an undeliverable payload
    async fn dead_letter(
        &self,
        device_id: &str,
        payload: crate::command::DevicePayload,
        reason: DeadLetterReason,
    ) -> Result<()>;

    /// Optional wake signal fired by `enqueue_state`. Senders block on it
    /// instead of polling when the store provides one.
    fn wake_handle(&self) -> Option<Arc<Notify>> {
        None
    }
}
