//! Device capability providers
//!
//! Two flavours exist: a catalog lookup for vendors whose LAN protocol
//! does not report capabilities (Govee), and a device-reported provider
//! seeded with protocol defaults (LIFX). The catalog is injected at
//! construction as a read-only lookup; the core never edits it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub trait CapabilityProvider: Send + Sync {
    /// Resolve capabilities for a model, or the provider's defaults
    fn capabilities_for(&self, model: Option<&str>) -> Value;
}

/// Catalog-backed lookup keyed by model number
pub struct CatalogCapabilityProvider {
    catalog: HashMap<String, Value>,
    defaults: Value,
}

impl CatalogCapabilityProvider {
    pub fn new(catalog: HashMap<String, Value>, defaults: Value) -> Self {
        Self { catalog, defaults }
    }

    /// Empty catalog; every model resolves to the defaults
    pub fn with_defaults(defaults: Value) -> Self {
        Self::new(HashMap::new(), defaults)
    }
}

impl CapabilityProvider for CatalogCapabilityProvider {
    fn capabilities_for(&self, model: Option<&str>) -> Value {
        model
            .and_then(|m| self.catalog.get(m))
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

/// For protocols whose devices report their own capabilities; the
/// defaults describe what every device of the protocol supports.
pub struct DeviceReportedCapabilityProvider {
    defaults: Value,
}

impl DeviceReportedCapabilityProvider {
    pub fn new(defaults: Value) -> Self {
        Self { defaults }
    }
}

impl CapabilityProvider for DeviceReportedCapabilityProvider {
    fn capabilities_for(&self, _model: Option<&str>) -> Value {
        self.defaults.clone()
    }
}

pub type CapabilityProviderHandle = Arc<dyn CapabilityProvider>;
