//! Multi-protocol discovery service
//!
//! Each cycle sends a Govee multicast scan and a LIFX GetService
//! broadcast (plus optional unicast probes to known manual devices),
//! waits for responses, and marks unseen devices stale. Responses are
//! matched to their protocol by arrival socket: Govee devices answer on
//! the local listen port (4002), LIFX on its own 56700 socket.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use luxbridge_core::{BridgeConfig, DeviceStore, DiscoveryResult, MetricsHandle};
use luxbridge_protocol::lifx::{
    Header, LifxHandler, MSG_STATE_HOST_FIRMWARE, MSG_STATE_LABEL, MSG_STATE_SERVICE,
    MSG_STATE_VERSION,
};
use luxbridge_protocol::{GoveeHandler, LIFX_PORT};

use crate::error::{DiscoveryError, Result};

/// Per-cycle state: duplicate suppression and one-shot follow-ups
#[derive(Default)]
struct CycleState {
    /// device_id -> last ip this cycle
    seen: HashMap<String, String>,
    version_requests: HashSet<(String, String)>,
    firmware_requests: HashSet<(String, String)>,
    label_requests: HashSet<(String, String)>,
}

struct DiscoveryInner {
    config: Arc<BridgeConfig>,
    store: Arc<dyn DeviceStore>,
    metrics: MetricsHandle,
    lifx: LifxHandler,
    cycle: Mutex<CycleState>,
}

pub struct DiscoveryService {
    inner: Arc<DiscoveryInner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    pub fn new(
        config: Arc<BridgeConfig>,
        store: Arc<dyn DeviceStore>,
        metrics: MetricsHandle,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(DiscoveryInner {
                config,
                store,
                metrics,
                lifx: LifxHandler::new(),
                cycle: Mutex::new(CycleState::default()),
            }),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Bind both response listeners and start the probe cycle loop.
    /// Port bind failures are fatal.
    pub async fn start(&mut self) -> Result<()> {
        if self.inner.config.dry_run {
            info!("discovery service running in dry-run mode; listeners not started");
            let inner = self.inner.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.tasks
                .push(tokio::spawn(run_cycles(inner, None, None, shutdown)));
            return Ok(());
        }

        let govee_addr = format!("0.0.0.0:{}", self.inner.config.discovery_listen_port);
        let govee_socket = UdpSocket::bind(&govee_addr)
            .await
            .map_err(|source| DiscoveryError::Bind {
                addr: govee_addr,
                source,
            })?;
        let govee_socket = Arc::new(govee_socket);

        let lifx_socket = Arc::new(bind_lifx_socket()?);

        info!(
            govee_multicast = %self.inner.config.discovery_multicast_address,
            govee_port = self.inner.config.discovery_multicast_port,
            lifx_port = LIFX_PORT,
            "discovery service started"
        );

        let inner = self.inner.clone();
        self.tasks.push(tokio::spawn(run_govee_listener(
            inner,
            govee_socket.clone(),
            self.shutdown_tx.subscribe(),
        )));

        let inner = self.inner.clone();
        self.tasks.push(tokio::spawn(run_lifx_listener(
            inner,
            lifx_socket.clone(),
            self.shutdown_tx.subscribe(),
        )));

        let inner = self.inner.clone();
        self.tasks.push(tokio::spawn(run_cycles(
            inner,
            Some(govee_socket),
            Some(lifx_socket),
            self.shutdown_tx.subscribe(),
        )));

        Ok(())
    }

    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!("discovery service stopped");
    }
}

fn bind_lifx_socket() -> Result<UdpSocket> {
    let addr = SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, LIFX_PORT));
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(DiscoveryError::Io)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into()).map_err(|source| DiscoveryError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

async fn run_cycles(
    inner: Arc<DiscoveryInner>,
    govee: Option<Arc<UdpSocket>>,
    lifx: Option<Arc<UdpSocket>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = inner
            .run_cycle(govee.as_deref(), lifx.as_deref(), &mut shutdown)
            .await
        {
            warn!(error = %e, "discovery cycle failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(inner.config.discovery_interval()) => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_govee_listener(
    inner: Arc<DiscoveryInner>,
    socket: Arc<UdpSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => inner.handle_govee_datagram(&buf[..len], from).await,
                    Err(e) => warn!(error = %e, "Govee discovery receive error"),
                }
            }
        }
    }
}

async fn run_lifx_listener(
    inner: Arc<DiscoveryInner>,
    socket: Arc<UdpSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 1024];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => {
                        inner.handle_lifx_datagram(&socket, &buf[..len], from).await;
                    }
                    Err(e) => warn!(error = %e, "LIFX discovery receive error"),
                }
            }
        }
    }
}

impl DiscoveryInner {
    fn reset_cycle(&self) {
        let mut cycle = self.cycle.lock();
        cycle.seen.clear();
        cycle.version_requests.clear();
        cycle.firmware_requests.clear();
        cycle.label_requests.clear();
    }

    /// Duplicate `(device_id, ip)` suppression; returns true when this
    /// pair was already handled this cycle.
    fn seen_before(&self, device_id: &str, ip: &str) -> bool {
        let mut cycle = self.cycle.lock();
        let previous = cycle.seen.insert(device_id.to_string(), ip.to_string());
        previous.as_deref() == Some(ip)
    }

    async fn run_cycle(
        &self,
        govee: Option<&UdpSocket>,
        lifx: Option<&UdpSocket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let started = Instant::now();

        if self.config.dry_run {
            debug!("skipping discovery probes in dry-run mode");
            self.store
                .mark_stale(self.config.discovery_stale_after_duration())
                .await?;
            return Ok(());
        }

        self.reset_cycle();

        if let Some(socket) = govee {
            let target = format!(
                "{}:{}",
                self.config.discovery_multicast_address, self.config.discovery_multicast_port
            );
            match socket
                .send_to(self.config.discovery_probe_payload.as_bytes(), &target)
                .await
            {
                Ok(_) => debug!(%target, "sent Govee scan probe"),
                Err(e) => warn!(%target, error = %e, "Govee scan probe failed"),
            }
        }

        if let Some(socket) = lifx {
            let probe = self.lifx.build_get_service();
            let target = format!("255.255.255.255:{LIFX_PORT}");
            match socket.send_to(&probe, &target).await {
                Ok(_) => debug!("sent LIFX GetService broadcast"),
                Err(e) => warn!(error = %e, "LIFX GetService broadcast failed"),
            }
        }

        if self.config.manual_unicast_probes {
            if let Some(socket) = govee {
                for (device_id, ip) in self.store.manual_probe_targets().await? {
                    let target = format!("{}:{}", ip, self.config.discovery_multicast_port);
                    debug!(device_id = %device_id, %target, "sending unicast probe");
                    if let Err(e) = socket
                        .send_to(self.config.discovery_probe_payload.as_bytes(), &target)
                        .await
                    {
                        debug!(device_id = %device_id, error = %e, "unicast probe failed");
                    }
                }
            }
        }

        // Collect responses, then age out whatever was never seen
        tokio::select! {
            _ = tokio::time::sleep(self.config.discovery_response_wait()) => {}
            _ = shutdown.changed() => {}
        }
        self.store
            .mark_stale(self.config.discovery_stale_after_duration())
            .await?;

        self.metrics
            .observe("discovery_cycle", started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn handle_govee_datagram(&self, data: &[u8], from: SocketAddr) {
        let from_ip = from.ip().to_string();
        let Some(result) = GoveeHandler::parse_scan_response(data, &from_ip) else {
            // Govee devices also route devStatus responses to this port
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
                if value["msg"]["cmd"] == "devStatus" {
                    debug!(%from, "devStatus response on discovery port");
                    return;
                }
            }
            self.metrics.incr("invalid_payload");
            warn!(%from, "failed to parse discovery response");
            return;
        };

        if self.seen_before(&result.id, &result.ip) {
            debug!(device_id = %result.id, ip = %result.ip, "ignoring duplicate discovery response");
            return;
        }

        info!(
            device_id = %result.id,
            ip = %result.ip,
            model_number = ?result.model_number,
            "discovered Govee device"
        );
        self.metrics.incr_labeled("discovery_responses", "multicast");
        self.record(result).await;
    }

    async fn handle_lifx_datagram(&self, socket: &UdpSocket, data: &[u8], from: SocketAddr) {
        let Some(header) = Header::decode(data) else {
            self.metrics.incr("lifx_parse_error");
            return;
        };
        let payload = header.payload(data);
        let ip = from.ip().to_string();

        match header.message_type {
            MSG_STATE_SERVICE => {
                let Some(parsed) = LifxHandler::parse_state_service(&header, payload) else {
                    self.metrics.incr("lifx_parse_error");
                    return;
                };
                let device_id = parsed["mac"].as_str().unwrap_or_default().to_string();
                let port = parsed["port"].as_u64().unwrap_or(LIFX_PORT as u64) as u16;

                self.send_followups(socket, &header.target, &device_id, &ip, port)
                    .await;

                if self.seen_before(&device_id, &ip) {
                    debug!(device_id = %device_id, %ip, "ignoring duplicate LIFX discovery response");
                    return;
                }

                info!(device_id = %device_id, %ip, port, "discovered LIFX device");
                self.metrics.incr_labeled("discovery_responses", "lifx_broadcast");
                self.record(DiscoveryResult {
                    id: device_id,
                    ip,
                    protocol: "lifx".to_string(),
                    name: None,
                    model_number: None,
                    device_type: Some("light".to_string()),
                    description: None,
                    capabilities: Some(serde_json::json!({
                        "port": port,
                        "service": parsed["service"],
                    })),
                    manual: false,
                })
                .await;
            }
            MSG_STATE_VERSION => {
                let Some(version) = LifxHandler::parse_state_version(payload) else {
                    self.metrics.incr("lifx_version_parse_error");
                    return;
                };
                let device_id = mac_string(&header.target);
                info!(
                    device_id = %device_id,
                    %ip,
                    model_number = ?version["model_number"].as_str(),
                    "received LIFX version details"
                );
                self.metrics.incr_labeled("discovery_responses", "lifx_version");
                self.record(DiscoveryResult {
                    id: device_id,
                    ip,
                    protocol: "lifx".to_string(),
                    name: None,
                    model_number: version["model_number"].as_str().map(String::from),
                    device_type: Some("light".to_string()),
                    description: None,
                    capabilities: Some(serde_json::json!({
                        "vendor_id": version["vendor_id"],
                        "product_id": version["product_id"],
                        "firmware_build": version["version_build"],
                    })),
                    manual: false,
                })
                .await;
            }
            MSG_STATE_HOST_FIRMWARE => {
                let Some(firmware) = LifxHandler::parse_state_host_firmware(payload) else {
                    self.metrics.incr("lifx_host_firmware_parse_error");
                    return;
                };
                let device_id = mac_string(&header.target);
                info!(device_id = %device_id, %ip, "received LIFX host firmware details");
                self.metrics
                    .incr_labeled("discovery_responses", "lifx_host_firmware");
                self.record(DiscoveryResult {
                    id: device_id,
                    ip,
                    protocol: "lifx".to_string(),
                    name: None,
                    model_number: None,
                    device_type: Some("light".to_string()),
                    description: None,
                    capabilities: Some(firmware),
                    manual: false,
                })
                .await;
            }
            MSG_STATE_LABEL => {
                let Some(label) = LifxHandler::parse_state_label(payload) else {
                    self.metrics.incr("lifx_label_parse_error");
                    return;
                };
                let device_id = mac_string(&header.target);
                let name = label["label"].as_str().filter(|s| !s.is_empty());
                info!(device_id = %device_id, %ip, label = ?name, "received LIFX label");
                self.metrics.incr_labeled("discovery_responses", "lifx_label");
                self.record(DiscoveryResult {
                    id: device_id,
                    ip,
                    protocol: "lifx".to_string(),
                    name: name.map(String::from),
                    model_number: None,
                    device_type: Some("light".to_string()),
                    description: None,
                    capabilities: None,
                    manual: false,
                })
                .await;
            }
            _ => {}
        }
    }

    /// Unicast GetVersion / GetHostFirmware / GetLabel, each at most
    /// once per `(device, ip)` per cycle.
    async fn send_followups(
        &self,
        socket: &UdpSocket,
        mac: &[u8; 6],
        device_id: &str,
        ip: &str,
        port: u16,
    ) {
        let key = (device_id.to_string(), ip.to_string());
        let target = format!("{ip}:{port}");

        let (send_version, send_firmware, send_label) = {
            let mut cycle = self.cycle.lock();
            (
                cycle.version_requests.insert(key.clone()),
                cycle.firmware_requests.insert(key.clone()),
                cycle.label_requests.insert(key),
            )
        };

        if send_version {
            if let Err(e) = socket.send_to(&self.lifx.build_get_version(*mac), &target).await {
                debug!(device_id = %device_id, error = %e, "LIFX GetVersion send failed");
            }
        }
        if send_firmware {
            if let Err(e) = socket
                .send_to(&self.lifx.build_get_host_firmware(*mac), &target)
                .await
            {
                debug!(device_id = %device_id, error = %e, "LIFX GetHostFirmware send failed");
            }
        }
        if send_label {
            if let Err(e) = socket.send_to(&self.lifx.build_get_label(*mac), &target).await {
                debug!(device_id = %device_id, error = %e, "LIFX GetLabel send failed");
            }
        }
    }

    async fn record(&self, result: DiscoveryResult) {
        if let Err(e) = self.store.record_discovery(result).await {
            warn!(error = %e, "discovery record failed");
        }
    }
}

fn mac_string(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
