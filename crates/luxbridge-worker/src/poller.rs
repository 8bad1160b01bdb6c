//! Background device liveness polling
//!
//! Polls devices whose protocol supports it, in rotating batches so
//! every device is eventually covered, pacing sends through a token
//! bucket. Consecutive cycle failures open a health cooldown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use luxbridge_core::{BridgeConfig, DeviceStore, MetricsHandle, PollTarget};
use luxbridge_protocol::{HandlerHandle, HandlerRegistry};

use crate::error::Result;
use crate::health::{BackoffPolicy, HealthMonitor};
use crate::rate::TokenBucket;

const SUBSYSTEM: &str = "poller";

pub struct DevicePollerService {
    inner: Arc<PollerInner>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

struct PollerInner {
    config: Arc<BridgeConfig>,
    store: Arc<dyn DeviceStore>,
    registry: Arc<HandlerRegistry>,
    metrics: MetricsHandle,
    health: HealthMonitor,
    backoff: BackoffPolicy,
    bucket: TokenBucket,
    cursor: Mutex<usize>,
}

impl DevicePollerService {
    pub fn new(
        config: Arc<BridgeConfig>,
        store: Arc<dyn DeviceStore>,
        registry: Arc<HandlerRegistry>,
        metrics: MetricsHandle,
    ) -> Self {
        let health = HealthMonitor::new(
            config.subsystem_failure_threshold,
            Duration::from_secs_f64(config.subsystem_failure_cooldown.max(0.0)),
        );
        let backoff = BackoffPolicy::new(
            config.device_poll_backoff_base,
            config.device_poll_backoff_factor,
            config.device_poll_backoff_max,
        );
        let bucket = TokenBucket::new(
            config.device_poll_rate_per_second,
            config.device_poll_rate_burst,
        );
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(PollerInner {
                config,
                store,
                registry,
                metrics,
                health,
                backoff,
                bucket,
                cursor: Mutex::new(0),
            }),
            shutdown_tx,
            task: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if !self.inner.config.device_poll_enabled {
            info!("device polling disabled; skipping poller startup");
            return Ok(());
        }
        if self.inner.config.dry_run {
            info!("dry-run mode; skipping poller startup");
            return Ok(());
        }

        let inner = self.inner.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.task = Some(tokio::spawn(run(inner, shutdown)));

        info!(
            interval_seconds = self.inner.config.device_poll_interval,
            timeout_seconds = self.inner.config.device_poll_timeout,
            rate_per_second = self.inner.config.device_poll_rate_per_second,
            batch_size = self.inner.config.device_poll_batch_size,
            "device poller started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("device poller stopped");
    }
}

async fn sleep_with_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if delay.is_zero() {
        return *shutdown.borrow();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

async fn run(inner: Arc<PollerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let (allowed, remaining) = inner.health.allow_attempt(SUBSYSTEM);
        if !allowed {
            warn!(
                cooldown_seconds = remaining.as_secs_f64(),
                "poller suppressed after failures"
            );
            if sleep_with_shutdown(&mut shutdown, remaining).await {
                break;
            }
            continue;
        }

        match inner.run_cycle().await {
            Ok(()) => {
                inner.health.record_success(SUBSYSTEM);
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "poll cycle failed");
                inner.health.record_failure(SUBSYSTEM);
                if sleep_with_shutdown(&mut shutdown, inner.backoff.delay(failures)).await {
                    break;
                }
                continue;
            }
        }

        if sleep_with_shutdown(&mut shutdown, inner.config.poll_interval()).await {
            break;
        }
    }
}

impl PollerInner {
    async fn run_cycle(&self) -> Result<()> {
        let targets: Vec<PollTarget> = self
            .store
            .poll_targets()
            .await?
            .into_iter()
            .filter(|target| {
                self.registry
                    .get(&target.protocol)
                    .map(|h| h.supports_polling())
                    .unwrap_or(false)
            })
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let batch = self.select_batch(&targets);
        futures::future::join_all(batch.into_iter().map(|target| self.poll_target(target))).await;
        Ok(())
    }

    /// Rotating-cursor batch selection so every device is eventually
    /// covered, wrapping around the target list.
    fn select_batch(&self, targets: &[PollTarget]) -> Vec<PollTarget> {
        let mut cursor = self.cursor.lock();
        let batch_size = self.config.device_poll_batch_size.clamp(1, targets.len());
        let start = *cursor % targets.len();
        let end = start + batch_size;
        let batch = if end <= targets.len() {
            targets[start..end].to_vec()
        } else {
            let mut wrapped = targets[start..].to_vec();
            wrapped.extend_from_slice(&targets[..end - targets.len()]);
            wrapped
        };
        *cursor = end % targets.len();
        batch
    }

    async fn poll_target(&self, target: PollTarget) {
        let Some(handler) = self.registry.get(&target.protocol) else {
            return;
        };

        self.bucket.acquire().await;

        let started = Instant::now();
        let status = self.poll_once(&target, &handler).await;
        self.metrics.incr_labeled("device_polls", status);
        self.metrics
            .observe("device_poll_duration", started.elapsed().as_secs_f64());
    }

    async fn poll_once(&self, target: &PollTarget, handler: &HandlerHandle) -> &'static str {
        let threshold = self.config.device_poll_offline_threshold;

        let request = match handler.build_poll_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(device_id = %target.id, error = %e, "poll request build failed");
                return "error";
            }
        };
        // Binary protocols patch the device identity into the request
        let request = match self.store.device(&target.id).await {
            Ok(Some(device)) => match handler.address_command(request, &device) {
                Ok(request) => request,
                Err(e) => {
                    warn!(device_id = %target.id, error = %e, "poll request addressing failed");
                    return "error";
                }
            },
            _ => request,
        };

        let port = if target.port != 0 {
            target.port
        } else {
            handler.default_port()
        };

        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect((target.ip.as_str(), port)).await?;
            socket.send(&request).await?;
            let mut buf = vec![0u8; 2048];
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);
            std::io::Result::Ok(buf)
        };

        match timeout(self.config.poll_timeout(), exchange).await {
            Ok(Ok(response)) => match handler.parse_poll_response(&response) {
                Some(state) => {
                    if let Err(e) = self
                        .store
                        .record_poll_success(&target.id, Some(state))
                        .await
                    {
                        warn!(device_id = %target.id, error = %e, "poll success record failed");
                    }
                    debug!(device_id = %target.id, "poll succeeded");
                    "success_state"
                }
                None => {
                    let _ = self.store.record_poll_failure(&target.id, threshold).await;
                    debug!(device_id = %target.id, "poll response unparseable");
                    "parse_failed"
                }
            },
            Ok(Err(e)) => {
                debug!(device_id = %target.id, ip = %target.ip, error = %e, "poll send failed");
                let _ = self.store.record_poll_failure(&target.id, threshold).await;
                "error"
            }
            Err(_) => {
                let _ = self.store.record_poll_failure(&target.id, threshold).await;
                "timeout"
            }
        }
    }
}
