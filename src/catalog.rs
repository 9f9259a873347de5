use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

/// A quality level a service can run at on a given device, trading execution
/// time for inference accuracy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QualityTier {
    /// Tier label carried into grants (e.g. a model-variant name).
    pub name: String,
    /// Execution time (seconds) at full resource allocation.
    pub exec_time: f64,
    /// Accuracy score in [0, 1].
    pub accuracy: f64,
}

/// The service execution-time table: for each `(service, device)` pair, the
/// execution time at full resource allocation, plus the quality tiers used by
/// the accuracy utility model.
///
/// A missing entry means the device does not support the service; lookups
/// return `None` and the candidate generator treats the pair as infinitely
/// slow. No hard error is raised.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    exec: HashMap<(String, String), f64>,
    tiers: HashMap<(String, String), Vec<QualityTier>>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    service: String,
    device: String,
    exec_time: f64,
    #[serde(default)]
    tiers: Vec<QualityTier>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    services: Vec<CatalogEntry>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the full-allocation execution time for a `(service, device)` pair.
    pub fn set_exec_time(&mut self, service: &str, device: &str, exec_time: f64) {
        self.exec
            .insert((service.to_string(), device.to_string()), exec_time);
    }

    /// Append a quality tier for a `(service, device)` pair.
    pub fn add_tier(&mut self, service: &str, device: &str, tier: QualityTier) {
        self.tiers
            .entry((service.to_string(), device.to_string()))
            .or_default()
            .push(tier);
    }

    /// Full-allocation execution time, or `None` when the device does not
    /// support the service.
    pub fn exec_time(&self, service: &str, device: &str) -> Option<f64> {
        self.exec
            .get(&(service.to_string(), device.to_string()))
            .copied()
            .filter(|t| *t > 0.0)
    }

    /// Quality tiers for a `(service, device)` pair; empty when unsupported.
    pub fn tiers(&self, service: &str, device: &str) -> &[QualityTier] {
        self.tiers
            .get(&(service.to_string(), device.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Load a catalog from its JSON representation:
    ///
    /// ```json
    /// { "services": [
    ///     { "service": "objDetect", "device": "rtx3090", "exec_time": 0.02,
    ///       "tiers": [ { "name": "s", "exec_time": 0.01, "accuracy": 0.71 } ] }
    /// ] }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).context("failed to parse service catalog JSON")?;

        let mut catalog = Self::new();
        for entry in file.services {
            catalog.set_exec_time(&entry.service, &entry.device, entry.exec_time);
            for tier in entry.tiers {
                catalog.add_tier(&entry.service, &entry.device, tier);
            }
        }
        Ok(catalog)
    }
}
