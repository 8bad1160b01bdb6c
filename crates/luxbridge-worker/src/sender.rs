//! Per-device send queue workers
//!
//! A fixed pool of workers drains the store's per-device queues. Each
//! device hashes to exactly one worker, so per-device ordering is
//! preserved. Undeliverable payloads go to the dead-letter table;
//! transient failures retry with jittered exponential backoff.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use luxbridge_core::{
    BridgeConfig, DeadLetterReason, Device, DeviceStateUpdate, DeviceStore, MetricsHandle,
};
use luxbridge_protocol::{HandlerHandle, HandlerRegistry};

use crate::error::Result;
use crate::health::BackoffPolicy;
use crate::rate::TokenBucket;
use crate::transport::CommandTransport;

pub struct DeviceSenderService {
    inner: Arc<SenderInner>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

struct SenderInner {
    config: Arc<BridgeConfig>,
    store: Arc<dyn DeviceStore>,
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn CommandTransport>,
    metrics: MetricsHandle,
    backoff: BackoffPolicy,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl DeviceSenderService {
    pub fn new(
        config: Arc<BridgeConfig>,
        store: Arc<dyn DeviceStore>,
        registry: Arc<HandlerRegistry>,
        transport: Arc<dyn CommandTransport>,
        metrics: MetricsHandle,
    ) -> Self {
        let backoff = BackoffPolicy::new(
            config.device_backoff_base,
            config.device_backoff_factor,
            config.device_backoff_max,
        );
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SenderInner {
                config,
                store,
                registry,
                transport,
                metrics,
                backoff,
                buckets: Mutex::new(HashMap::new()),
            }),
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let worker_count = self.inner.config.device_sender_workers;
        for index in 0..worker_count {
            let inner = self.inner.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.workers
                .push(tokio::spawn(run_worker(inner, shutdown, index, worker_count)));
        }
        info!(workers = worker_count, "device sender started");
        Ok(())
    }

    /// Stop accepting work and drain in-flight sends up to the grace
    /// deadline. Queued entries that were never popped stay in the store.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let drain = futures::future::join_all(std::mem::take(&mut self.workers));
        if tokio::time::timeout(self.inner.config.shutdown_grace_period(), drain)
            .await
            .is_err()
        {
            warn!("sender workers did not drain before the grace deadline");
        }
        info!("device sender stopped");
    }
}

/// Stable device-to-worker assignment
fn owner_of(device_id: &str, worker_count: usize) -> usize {
    let hash = device_id
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
    (hash % worker_count as u64) as usize
}

async fn run_worker(
    inner: Arc<SenderInner>,
    mut shutdown: watch::Receiver<bool>,
    index: usize,
    worker_count: usize,
) {
    let wake = inner.store.wake_handle();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let pending = match inner.store.pending_device_ids().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "failed to list pending devices");
                Vec::new()
            }
        };
        let nothing_pending = pending.is_empty();
        let mine: Vec<String> = pending
            .into_iter()
            .filter(|id| owner_of(id, worker_count) == index)
            .collect();

        if mine.is_empty() {
            // Longer nap when the whole system is idle, short one when
            // another worker's devices have work.
            let poll_interval = if nothing_pending {
                inner.config.idle_wait()
            } else {
                inner.config.queue_poll_interval()
            };
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = async {
                    match &wake {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        }

        for device_id in mine {
            if *shutdown.borrow() {
                break;
            }
            loop {
                let update = match inner.store.pop_next_for(&device_id).await {
                    Ok(Some(update)) => update,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "queue pop failed");
                        break;
                    }
                };
                inner.process_update(update, &mut shutdown).await;
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

impl SenderInner {
    fn bucket_for(&self, device_id: &str) -> Arc<TokenBucket> {
        self.buckets
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    self.config.device_max_send_rate,
                    self.config.device_send_burst,
                ))
            })
            .clone()
    }

    async fn dead_letter(&self, update: &DeviceStateUpdate, reason: DeadLetterReason) {
        warn!(
            device_id = %update.device_id,
            %reason,
            context_id = ?update.context_id,
            "dead-lettering device update"
        );
        self.metrics.incr_labeled("device_dead_letters", &reason.to_string());
        if let Err(e) = self
            .store
            .dead_letter(&update.device_id, update.payload.clone(), reason)
            .await
        {
            warn!(device_id = %update.device_id, error = %e, "dead-letter write failed");
        }
    }

    async fn process_update(
        &self,
        update: DeviceStateUpdate,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let device = match self.store.device(&update.device_id).await {
            Ok(device) => device,
            Err(e) => {
                warn!(device_id = %update.device_id, error = %e, "device lookup failed");
                None
            }
        };

        // Permanent conditions: drain without retrying
        let Some(device) = device else {
            self.dead_letter(&update, DeadLetterReason::DeviceUnavailable)
                .await;
            return;
        };
        if !device.enabled || device.offline {
            self.dead_letter(&update, DeadLetterReason::DeviceUnavailable)
                .await;
            return;
        }
        if device.ip.is_empty() {
            self.dead_letter(&update, DeadLetterReason::MissingIp).await;
            return;
        }
        let Some(handler) = self.registry.get(&device.protocol) else {
            self.dead_letter(&update, DeadLetterReason::UnsupportedProtocol)
                .await;
            return;
        };

        self.bucket_for(&update.device_id).acquire().await;

        let commands = match self.encode(&handler, &update, &device) {
            Ok(commands) => commands,
            Err(()) => {
                self.dead_letter(&update, DeadLetterReason::EncodeError).await;
                return;
            }
        };

        let port = device.port_or(handler.default_port());
        let addr: SocketAddr = match format!("{}:{}", device.ip, port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(device_id = %device.id, ip = %device.ip, error = %e, "unresolvable device address");
                self.dead_letter(&update, DeadLetterReason::MissingIp).await;
                return;
            }
        };

        let mut attempts = 0u32;
        loop {
            match self.send_batch(&commands, addr).await {
                Ok(()) => {
                    self.metrics.incr("device_sends");
                    debug!(
                        device_id = %device.id,
                        commands = commands.len(),
                        context_id = ?update.context_id,
                        "sent device update"
                    );
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.device_max_attempts {
                        warn!(device_id = %device.id, error = %e, attempts, "send failed after retries");
                        self.dead_letter(&update, DeadLetterReason::SendFailedAfterRetries)
                            .await;
                        return;
                    }
                    debug!(device_id = %device.id, error = %e, attempts, "send failed, backing off");
                    let delay = self.backoff.delay_jittered(attempts);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            // Shutdown mid-retry: put the update back so
                            // it survives the restart.
                            let _ = self.store.enqueue_state(update).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn encode(
        &self,
        handler: &HandlerHandle,
        update: &DeviceStateUpdate,
        device: &Device,
    ) -> std::result::Result<Vec<Bytes>, ()> {
        let commands = handler.wrap_command(&update.payload).map_err(|e| {
            warn!(device_id = %device.id, error = %e, "command encode failed");
        })?;
        commands
            .into_iter()
            .map(|command| {
                handler.address_command(command, device).map_err(|e| {
                    warn!(device_id = %device.id, error = %e, "command addressing failed");
                })
            })
            .collect()
    }

    /// Send a batch in order with inter-command spacing. Any failure
    /// aborts the batch and counts as one attempt.
    async fn send_batch(&self, commands: &[Bytes], addr: SocketAddr) -> Result<()> {
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.command_spacing()).await;
            }
            self.transport.send(command, addr).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_assignment_is_stable_and_bounded() {
        for id in ["dev-a", "dev-b", "AA:BB:CC:DD:EE:FF", ""] {
            let first = owner_of(id, 4);
            assert_eq!(first, owner_of(id, 4));
            assert!(first < 4);
        }
    }
}
