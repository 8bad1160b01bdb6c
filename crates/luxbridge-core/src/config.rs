//! Bridge configuration
//!
//! Every recognised option with its default. Interval-style options are
//! plain seconds in the file and surfaced as `Duration` through accessor
//! methods; sample rates are clamped into [0, 1] by `normalise`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// ArtNet listen port
    #[serde(default = "default_artnet_port")]
    pub artnet_port: u16,
    /// sACN listen port
    #[serde(default = "default_sacn_port")]
    pub sacn_port: u16,
    /// Join per-universe multicast groups (unicast still accepted)
    #[serde(default = "default_true")]
    pub sacn_multicast: bool,
    /// Universes whose multicast groups are joined
    #[serde(default = "default_sacn_universes")]
    pub sacn_universes: Vec<u16>,

    /// Govee discovery multicast group (send side)
    #[serde(default = "default_discovery_multicast_address")]
    pub discovery_multicast_address: String,
    /// Govee discovery multicast port (send side)
    #[serde(default = "default_discovery_multicast_port")]
    pub discovery_multicast_port: u16,
    /// Local port where Govee devices answer scans and devStatus
    #[serde(default = "default_discovery_listen_port")]
    pub discovery_listen_port: u16,
    #[serde(default = "default_discovery_interval_seconds")]
    pub discovery_interval_seconds: f64,
    /// How long a cycle waits collecting responses
    #[serde(default = "default_discovery_response_timeout")]
    pub discovery_response_timeout: f64,
    /// Devices unseen for this long are marked stale
    #[serde(default = "default_discovery_stale_after")]
    pub discovery_stale_after: f64,
    /// Govee scan probe body
    #[serde(default = "default_discovery_probe_payload")]
    pub discovery_probe_payload: String,
    /// Also probe known manual devices by unicast
    #[serde(default)]
    pub manual_unicast_probes: bool,

    /// Listeners come up but nothing is sent to devices
    #[serde(default)]
    pub dry_run: bool,

    /// Trailing debounce applied to device updates, seconds
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: f64,
    /// Attach trace context ids to sampled updates
    #[serde(default)]
    pub trace_context_ids: bool,
    #[serde(default)]
    pub trace_context_sample_rate: f64,
    /// Sample rate for per-packet debug logging
    #[serde(default = "default_noisy_log_sample_rate")]
    pub noisy_log_sample_rate: f64,

    /// Per-device send rate, commands per second
    #[serde(default = "default_device_max_send_rate")]
    pub device_max_send_rate: f64,
    #[serde(default = "default_device_send_burst")]
    pub device_send_burst: f64,
    #[serde(default = "default_device_backoff_base")]
    pub device_backoff_base: f64,
    #[serde(default = "default_device_backoff_factor")]
    pub device_backoff_factor: f64,
    #[serde(default = "default_device_backoff_max")]
    pub device_backoff_max: f64,
    /// Send attempts before a payload dead-letters
    #[serde(default = "default_device_max_attempts")]
    pub device_max_attempts: u32,
    /// Fallback queue poll interval when the store has no wake signal
    #[serde(default = "default_device_queue_poll_interval")]
    pub device_queue_poll_interval: f64,
    /// Idle wait when no device has pending work
    #[serde(default = "default_device_idle_wait")]
    pub device_idle_wait: f64,
    /// Spacing between sub-commands of a multi-command batch
    #[serde(default = "default_device_command_spacing")]
    pub device_command_spacing: f64,
    /// Number of sender workers
    #[serde(default = "default_device_sender_workers")]
    pub device_sender_workers: usize,

    #[serde(default)]
    pub device_poll_enabled: bool,
    #[serde(default = "default_device_poll_interval")]
    pub device_poll_interval: f64,
    #[serde(default = "default_device_poll_timeout")]
    pub device_poll_timeout: f64,
    /// Consecutive failures before a device goes offline
    #[serde(default = "default_device_poll_offline_threshold")]
    pub device_poll_offline_threshold: u32,
    #[serde(default = "default_device_poll_rate_per_second")]
    pub device_poll_rate_per_second: f64,
    #[serde(default = "default_device_poll_rate_burst")]
    pub device_poll_rate_burst: f64,
    #[serde(default = "default_device_poll_batch_size")]
    pub device_poll_batch_size: usize,
    #[serde(default = "default_device_poll_backoff_base")]
    pub device_poll_backoff_base: f64,
    #[serde(default = "default_device_backoff_factor")]
    pub device_poll_backoff_factor: f64,
    #[serde(default = "default_device_poll_backoff_max")]
    pub device_poll_backoff_max: f64,

    /// Consecutive cycle failures before a subsystem enters cooldown
    #[serde(default = "default_subsystem_failure_threshold")]
    pub subsystem_failure_threshold: u32,
    #[serde(default = "default_subsystem_failure_cooldown")]
    pub subsystem_failure_cooldown: f64,

    /// Grace period for draining in-flight sends at shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: f64,
}

fn default_artnet_port() -> u16 {
    6454
}
fn default_sacn_port() -> u16 {
    5568
}
fn default_true() -> bool {
    true
}
fn default_sacn_universes() -> Vec<u16> {
    vec![1]
}
fn default_discovery_multicast_address() -> String {
    "239.255.255.250".to_string()
}
fn default_discovery_multicast_port() -> u16 {
    4001
}
fn default_discovery_listen_port() -> u16 {
    4002
}
fn default_discovery_interval_seconds() -> f64 {
    300.0
}
fn default_discovery_response_timeout() -> f64 {
    8.0
}
fn default_discovery_stale_after() -> f64 {
    3600.0
}
fn default_discovery_probe_payload() -> String {
    r#"{"msg":{"cmd":"scan","data":{"account_topic":"reserve"}}}"#.to_string()
}
fn default_debounce_seconds() -> f64 {
    0.02
}
fn default_noisy_log_sample_rate() -> f64 {
    0.01
}
fn default_device_max_send_rate() -> f64 {
    20.0
}
fn default_device_send_burst() -> f64 {
    5.0
}
fn default_device_backoff_base() -> f64 {
    0.2
}
fn default_device_backoff_factor() -> f64 {
    2.0
}
fn default_device_backoff_max() -> f64 {
    5.0
}
fn default_device_max_attempts() -> u32 {
    3
}
fn default_device_queue_poll_interval() -> f64 {
    0.1
}
fn default_device_idle_wait() -> f64 {
    0.5
}
fn default_device_command_spacing() -> f64 {
    0.01
}
fn default_device_sender_workers() -> usize {
    4
}
fn default_device_poll_interval() -> f64 {
    30.0
}
fn default_device_poll_timeout() -> f64 {
    2.0
}
fn default_device_poll_offline_threshold() -> u32 {
    3
}
fn default_device_poll_rate_per_second() -> f64 {
    5.0
}
fn default_device_poll_rate_burst() -> f64 {
    5.0
}
fn default_device_poll_batch_size() -> usize {
    10
}
fn default_device_poll_backoff_base() -> f64 {
    1.0
}
fn default_device_poll_backoff_max() -> f64 {
    30.0
}
fn default_subsystem_failure_threshold() -> u32 {
    5
}
fn default_subsystem_failure_cooldown() -> f64 {
    60.0
}
fn default_shutdown_grace() -> f64 {
    3.0
}

impl Default for BridgeConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserialises")
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl BridgeConfig {
    /// Clamp rate-style fields into their valid ranges
    pub fn normalise(mut self) -> Self {
        self.trace_context_sample_rate = self.trace_context_sample_rate.clamp(0.0, 1.0);
        self.noisy_log_sample_rate = self.noisy_log_sample_rate.clamp(0.0, 1.0);
        self.device_sender_workers = self.device_sender_workers.max(1);
        self.device_poll_batch_size = self.device_poll_batch_size.max(1);
        self
    }

    pub fn debounce(&self) -> Duration {
        secs(self.debounce_seconds)
    }

    pub fn discovery_interval(&self) -> Duration {
        secs(self.discovery_interval_seconds)
    }

    pub fn discovery_response_wait(&self) -> Duration {
        secs(self.discovery_response_timeout)
    }

    pub fn discovery_stale_after_duration(&self) -> Duration {
        secs(self.discovery_stale_after)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        secs(self.device_queue_poll_interval)
    }

    pub fn idle_wait(&self) -> Duration {
        secs(self.device_idle_wait)
    }

    pub fn command_spacing(&self) -> Duration {
        secs(self.device_command_spacing)
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.device_poll_interval)
    }

    pub fn poll_timeout(&self) -> Duration {
        secs(self.device_poll_timeout)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        secs(self.shutdown_grace)
    }
}
