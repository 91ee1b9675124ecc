//! Per-client limit overrides.
//!
//! Clients listed here get their own capacity and refill rate instead of the
//! service-wide defaults. Overrides are read from a YAML file at startup and
//! can be changed at runtime through the admin API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::bucket::BucketLimits;
use super::client_id;
use crate::error::{PinglimitError, Result};

/// A single client override entry as it appears in the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOverride {
    /// The client identifier this override applies to
    pub id: String,
    /// Bucket capacity for this client
    pub capacity: f64,
    /// Refill rate for this client, in tokens per second
    pub refill_rate_per_second: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OverridesFile {
    #[serde(default)]
    clients: Vec<ClientOverride>,
}

/// The set of configured per-client overrides.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    clients: HashMap<String, BucketLimits>,
}

impl ClientOverrides {
    /// Create an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading client overrides");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load overrides from a YAML string.
    ///
    /// ```yaml
    /// clients:
    ///   - id: "1"
    ///     capacity: 100
    ///     refill_rate_per_second: 10
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: OverridesFile = serde_yaml::from_str(yaml).map_err(|e| {
            PinglimitError::Config(format!("Failed to parse client overrides: {}", e))
        })?;

        let mut overrides = Self::new();
        for entry in file.clients {
            client_id::validate(&entry.id)
                .map_err(|e| PinglimitError::Config(format!("override entry: {}", e)))?;
            let limits = BucketLimits::new(entry.capacity, entry.refill_rate_per_second)
                .map_err(|e| {
                    PinglimitError::Config(format!("override for client {}: {}", entry.id, e))
                })?;
            if overrides.clients.insert(entry.id.clone(), limits).is_some() {
                return Err(PinglimitError::Config(format!(
                    "duplicate override for client {}",
                    entry.id
                )));
            }
        }
        Ok(overrides)
    }

    /// Get the override for a client, if any.
    pub fn get(&self, client_id: &str) -> Option<BucketLimits> {
        self.clients.get(client_id).copied()
    }

    /// Insert or replace an override. Returns the previous limits.
    pub fn insert(&mut self, client_id: &str, limits: BucketLimits) -> Option<BucketLimits> {
        self.clients.insert(client_id.to_string(), limits)
    }

    /// Remove an override. Returns the removed limits.
    pub fn remove(&mut self, client_id: &str) -> Option<BucketLimits> {
        self.clients.remove(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
