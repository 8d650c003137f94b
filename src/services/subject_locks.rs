//! Per-subject mutual exclusion
//!
//! Samples for the same subject must not overlap: the detector reads the prior
//! occupancy and writes the next one. A process-wide lock would serialize
//! unrelated subjects, so each subject gets its own mutex, created on first use.

use crate::domain::types::SubjectId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Lock table keyed by subject
#[derive(Default)]
pub struct SubjectLocks {
    locks: Mutex<FxHashMap<SubjectId, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the mutex guarding `subject_id`
    ///
    /// The table lock is held only long enough to clone the handle.
    pub fn handle(&self, subject_id: &SubjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(subject_id) {
            return lock.clone();
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(subject_id.clone(), lock.clone());
        lock
    }

    /// Number of subjects with a lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
