//! Device discovery for luxbridge
//!
//! Periodic probe cycles across every supported protocol: Govee
//! multicast scan with responses on the local listen port, LIFX
//! GetService broadcast with per-device follow-up queries, optional
//! unicast probes for manually configured devices, and stale marking.

pub mod error;
pub mod service;

pub use error::{DiscoveryError, Result};
pub use service::DiscoveryService;
