//! Device sender and poller workers for luxbridge
//!
//! The sender drains per-device queues from the store with rate limits,
//! retries, and dead-letter capture; the poller runs paced liveness
//! polls with rotating batches and health-gated suppression.

pub mod error;
pub mod health;
pub mod poller;
pub mod rate;
pub mod sender;
pub mod transport;

pub use error::{Result, WorkerError};
pub use health::{BackoffPolicy, HealthMonitor};
pub use poller::DevicePollerService;
pub use rate::TokenBucket;
pub use sender::DeviceSenderService;
pub use transport::{CommandTransport, DryRunTransport, UdpCommandTransport};
