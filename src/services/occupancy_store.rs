//! Per-subject occupancy state store
//!
//! Holds the region each subject currently occupies plus last-seen metadata.
//! This is the only mutable state in the engine. The store does no locking
//! beyond keeping its map consistent; read-modify-write sequences for one
//! subject are serialized by the detector through `SubjectLocks`.
//!
//! The in-memory store loses everything on restart: a subject mid-visit at
//! restart never gets an exit for that visit, and its next in-region sample
//! reads as a fresh entry. A durable implementation of `OccupancyStore` is the
//! way around that.

use crate::domain::types::{SubjectId, SubjectOccupancy};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Storage seam for subject occupancy records
pub trait OccupancyStore: Send + Sync {
    /// Current record for `subject_id`, or an unoccupied one if never seen
    fn get(&self, subject_id: &SubjectId) -> SubjectOccupancy;

    /// Replace the record for `occupancy.subject_id`
    fn set(&self, occupancy: SubjectOccupancy);

    /// Forget the record for one subject (back to unoccupied)
    fn clear(&self, subject_id: &SubjectId);

    /// Forget every record
    fn clear_all(&self);

    /// Number of subjects currently inside a region
    fn occupied_count(&self) -> usize;
}

/// Process-lifetime map of occupancy records
#[derive(Default)]
pub struct InMemoryOccupancyStore {
    records: RwLock<FxHashMap<SubjectId, SubjectOccupancy>>,
}

impl InMemoryOccupancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subjects with a stored record
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl OccupancyStore for InMemoryOccupancyStore {
    fn get(&self, subject_id: &SubjectId) -> SubjectOccupancy {
        self.records
            .read()
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| SubjectOccupancy::unoccupied(subject_id.clone()))
    }

    fn set(&self, occupancy: SubjectOccupancy) {
        self.records.write().insert(occupancy.subject_id.clone(), occupancy);
    }

    fn clear(&self, subject_id: &SubjectId) {
        self.records.write().remove(subject_id);
    }

    fn clear_all(&self) {
        self.records.write().clear();
    }

    fn occupied_count(&self) -> usize {
        self.records.read().values().filter(|o| o.is_inside()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coordinate, RegionId};
    use chrono::{TimeZone, Utc};

    fn entered(subject: &str, region: &str) -> SubjectOccupancy {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        SubjectOccupancy::entered(
            SubjectId::new(subject),
            RegionId::new(region),
            &Coordinate::new(1.0, 2.0),
            at,
        )
    }

    #[test]
    fn test_get_unknown_subject_is_unoccupied() {
        let store = InMemoryOccupancyStore::new();
        let occ = store.get(&SubjectId::new("nobody"));
        assert_eq!(occ.subject_id.as_str(), "nobody");
        assert!(!occ.is_inside());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let store = InMemoryOccupancyStore::new();
        store.set(entered("s1", "home"));

        let occ = store.get(&SubjectId::new("s1"));
        assert_eq!(occ.occupied_region_id().map(|r| r.as_str()), Some("home"));
        assert_eq!(store.occupied_count(), 1);
    }

    #[test]
    fn test_clear_single_subject() {
        let store = InMemoryOccupancyStore::new();
        store.set(entered("s1", "home"));
        store.set(entered("s2", "park"));

        store.clear(&SubjectId::new("s1"));

        assert!(!store.get(&SubjectId::new("s1")).is_inside());
        assert!(store.get(&SubjectId::new("s2")).is_inside());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_all() {
        let store = InMemoryOccupancyStore::new();
        store.set(entered("s1", "home"));
        store.set(entered("s2", "park"));

        store.clear_all();

        assert!(store.is_empty());
        assert_eq!(store.occupied_count(), 0);
    }
}
