//! Binds schedule entries to adapter implementations by name.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use skyfeed_core::{ConfigError, ScheduleEntry, SourcesFile};

use crate::adapter::SourceAdapter;
use crate::nasa::ApodAdapter;
use crate::nist::NvdAdapter;
use crate::space::CelestrakAdapter;

/// Adapter implementations shipped with the crate.
pub const BUNDLED: &[&str] = &["nasa", "space", "nist"];

/// Build the adapter an entry refers to (`adapter`, or the entry name).
pub fn build_adapter(
    entry: &ScheduleEntry,
    timeout: Duration,
) -> Result<Arc<dyn SourceAdapter>, ConfigError> {
    let adapter: Arc<dyn SourceAdapter> = match entry.adapter_name() {
        "nasa" => Arc::new(ApodAdapter::from_entry(entry, timeout)),
        "space" => Arc::new(CelestrakAdapter::from_entry(entry, timeout)),
        "nist" => Arc::new(NvdAdapter::from_entry(entry, timeout)),
        other => {
            return Err(ConfigError::Invalid(format!(
                "source '{}': unknown adapter '{other}' (expected one of {})",
                entry.name,
                BUNDLED.join(", ")
            )))
        }
    };
    Ok(adapter)
}

/// Adapters keyed by source name.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for every enabled source.
    pub fn from_sources(sources: &SourcesFile, timeout: Duration) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for entry in sources.enabled() {
            registry.register(build_adapter(entry, timeout)?);
            info!(source = %entry.name, adapter = entry.adapter_name(), "adapter registered");
        }
        Ok(registry)
    }

    /// Register under the adapter's own name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
