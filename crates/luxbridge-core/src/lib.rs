//! Luxbridge core types and contracts
//!
//! Shared vocabulary for the DMX-to-LAN bridge:
//! - [`DmxFrame`]: the protocol-agnostic unit every ingress produces
//! - [`DevicePayload`] / [`DeviceCommand`]: abstract device state and its
//!   ordered command decomposition
//! - [`MappingRecord`]: persisted channel-to-device mappings
//! - [`Device`] and friends: device records and delivery bookkeeping
//! - [`DeviceStore`]: the persistence contract the data plane consumes
//! - [`EventBus`]: config-reload notifications
//! - [`Metrics`]: the counter/histogram seam
//! - [`BridgeConfig`]: every recognised option with defaults

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;
pub mod mapping;
pub mod metrics;
pub mod store;

pub use command::{Color, DeviceCommand, DevicePayload, Power};
pub use config::BridgeConfig;
pub use device::{
    DeadLetter, DeadLetterReason, Device, DeviceStateUpdate, DiscoveryResult, PollTarget,
};
pub use error::{Error, Result};
pub use events::{
    EventBus, Subscription, SystemEvent, EVENT_MAPPING_CREATED, EVENT_MAPPING_DELETED,
    EVENT_MAPPING_UPDATED,
};
pub use frame::{
    DmxFrame, SourceProtocol, ARTNET_FIXED_PRIORITY, DMX_CHANNELS, MAX_PRIORITY, MAX_UNIVERSE,
    SACN_DEFAULT_PRIORITY,
};
pub use mapping::{
    validate_overlaps, MappingCapabilities, MappingField, MappingKind, MappingRecord, Template,
    WhitePolicy,
};
pub use metrics::{Metrics, MetricsHandle, NoopMetrics};
pub use store::DeviceStore;
