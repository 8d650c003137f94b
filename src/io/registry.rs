//! Region registry snapshot
//!
//! Regions are owned by an external registry; this loads a read-only snapshot
//! from a JSON file keyed by subject:
//!
//! ```json
//! { "elder-1": [ { "id": "home", "name": "Home", "latitude": 40.0,
//!                  "longitude": -74.0, "radius_meters": 100, "is_active": true } ] }
//! ```
//!
//! List order is preserved since it sets containment priority.

use crate::domain::types::{Region, SubjectId};
use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Wire shape of one region in the registry file
#[derive(Debug, Deserialize)]
struct RegionRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    latitude: f64,
    longitude: f64,
    radius_meters: f64,
    #[serde(default = "default_is_active")]
    is_active: bool,
}

fn default_is_active() -> bool {
    true
}

/// Per-subject ordered region lists
#[derive(Debug, Default, Clone)]
pub struct RegionRegistry {
    regions: FxHashMap<SubjectId, Vec<Region>>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry snapshot from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P, include_inactive: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read region registry {}", path.display()))?;
        let registry = Self::from_json(&content, include_inactive)
            .with_context(|| format!("Failed to parse region registry {}", path.display()))?;

        info!(
            file = %path.display(),
            subjects = %registry.subject_count(),
            regions = %registry.region_count(),
            "region_registry_loaded"
        );
        Ok(registry)
    }

    /// Parse a registry snapshot from JSON text
    pub fn from_json(content: &str, include_inactive: bool) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, Vec<RegionRecord>> = serde_json::from_str(content)?;
        let mut registry = Self::new();

        for (subject, records) in raw {
            let mut regions = Vec::with_capacity(records.len());
            for record in records {
                if !record.is_active && !include_inactive {
                    continue;
                }
                if !record.radius_meters.is_finite() || record.radius_meters <= 0.0 {
                    warn!(
                        subject = %subject,
                        region = %record.id,
                        radius_meters = %record.radius_meters,
                        "region_invalid_radius_skipped"
                    );
                    continue;
                }
                let mut region =
                    Region::new(record.id, record.latitude, record.longitude, record.radius_meters);
                region.name = record.name;
                regions.push(region);
            }
            registry.insert(SubjectId::new(subject), regions);
        }

        Ok(registry)
    }

    /// Replace the region list for a subject
    pub fn insert(&mut self, subject_id: SubjectId, regions: Vec<Region>) {
        self.regions.insert(subject_id, regions);
    }

    /// Ordered regions for a subject (empty if unknown)
    pub fn regions_for(&self, subject_id: &SubjectId) -> &[Region] {
        self.regions.get(subject_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn subject_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REGISTRY: &str = r#"{
        "elder-1": [
            {"id": "home", "name": "Home", "latitude": 40.0, "longitude": -74.0, "radius_meters": 500},
            {"id": "bedroom", "latitude": 40.0, "longitude": -74.0, "radius_meters": 50},
            {"id": "old-clinic", "latitude": 40.1, "longitude": -74.1, "radius_meters": 80, "is_active": false},
            {"id": "broken", "latitude": 40.2, "longitude": -74.2, "radius_meters": 0}
        ],
        "elder-2": []
    }"#;

    #[test]
    fn test_order_preserved_and_filters_applied() {
        let registry = RegionRegistry::from_json(REGISTRY, false).unwrap();
        let ids: Vec<_> = registry
            .regions_for(&SubjectId::new("elder-1"))
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["home", "bedroom"]);
        assert_eq!(
            registry.regions_for(&SubjectId::new("elder-1"))[0].name.as_deref(),
            Some("Home")
        );
    }

    #[test]
    fn test_include_inactive() {
        let registry = RegionRegistry::from_json(REGISTRY, true).unwrap();
        assert_eq!(registry.regions_for(&SubjectId::new("elder-1")).len(), 3);
    }

    #[test]
    fn test_unknown_subject_is_empty() {
        let registry = RegionRegistry::from_json(REGISTRY, false).unwrap();
        assert!(registry.regions_for(&SubjectId::new("nobody")).is_empty());
        assert!(registry.regions_for(&SubjectId::new("elder-2")).is_empty());
        assert_eq!(registry.subject_count(), 2);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(REGISTRY.as_bytes()).unwrap();
        file.flush().unwrap();

        let registry = RegionRegistry::from_file(file.path(), false).unwrap();
        assert_eq!(registry.region_count(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let err = RegionRegistry::from_file("/nonexistent/regions.json", false).unwrap_err();
        assert!(err.to_string().contains("Failed to read region registry"));
    }
}
