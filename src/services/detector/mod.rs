//! Geofence transition detection
//!
//! The TransitionDetector is the per-sample state machine. Each subject is
//! either OUTSIDE (no occupied region) or INSIDE(region). On every sample it:
//! - resolves the containing region (first match in list order)
//! - compares against the stored occupancy for the subject
//! - on a change, builds an exit for the prior region and/or an entry for the
//!   new one (both on a direct handoff, exit first)
//! - updates the store and hands the events to the emitter
//!
//! Emission is fire-and-forget. If the emitter refuses an event the occupancy
//! update stands: the transition cannot be re-derived from raw samples later,
//! so future detection stays consistent at the cost of a gap in the event log.

pub mod policy;

use crate::domain::types::{Coordinate, Region, SubjectId, SubjectOccupancy, TransitionEvent};
use crate::infra::metrics::Metrics;
use crate::io::emitter::EventEmitter;
use crate::services::clock::{Clock, SystemClock};
use crate::services::containment;
use crate::services::occupancy_store::{InMemoryOccupancyStore, OccupancyStore};
use crate::services::subject_locks::SubjectLocks;
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use policy::{dwell_minutes, DetectorConfig, ExitTimePolicy};

/// Events produced by one sample: none, one, or exit-then-entry
pub type Transitions = SmallVec<[TransitionEvent; 2]>;

/// Per-sample geofence state machine
pub struct TransitionDetector {
    /// Occupancy records, one per subject
    store: Arc<dyn OccupancyStore>,
    /// Serializes samples for the same subject
    locks: SubjectLocks,
    /// Exit-time policy and sampling cadence
    config: DetectorConfig,
    /// Processing time, for samples without a timestamp
    clock: Arc<dyn Clock>,
    /// Hand-off to the event sink (optional: library callers may forward returned events)
    emitter: Option<Arc<dyn EventEmitter>>,
    /// Metrics collector
    metrics: Arc<Metrics>,
}

impl TransitionDetector {
    /// Create a detector over an in-memory store, wall clock, and no emitter
    pub fn new(config: DetectorConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store: Arc::new(InMemoryOccupancyStore::new()),
            locks: SubjectLocks::new(),
            config,
            clock: Arc::new(SystemClock),
            emitter: None,
            metrics,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn OccupancyStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Process one positional sample for `subject_id` against `regions`
    ///
    /// `regions` is the authoritative snapshot for this call; its order is the
    /// containment priority. Returns the events produced, exit before entry.
    pub fn process_sample(
        &self,
        subject_id: &SubjectId,
        point: &Coordinate,
        regions: &[Region],
    ) -> Transitions {
        let process_start = Instant::now();

        // Fast path: nothing to be inside of, state untouched
        if regions.is_empty() {
            debug!(subject = %subject_id, "no_regions_configured");
            self.metrics.record_no_region_sample();
            self.metrics.record_sample_processed(process_start.elapsed().as_micros() as u64);
            return Transitions::new();
        }

        let sample_at = self.sample_timestamp(subject_id, point);
        let current = containment::resolve(point.point(), regions);

        let events = {
            let lock = self.locks.handle(subject_id);
            let _guard = lock.lock();
            let events = self.transition(subject_id, point, current, sample_at);
            // Emit under the guard so one subject's events reach the emitter in order
            for event in &events {
                self.emit(event.clone());
            }
            events
        };

        self.metrics.record_sample_processed(process_start.elapsed().as_micros() as u64);
        events
    }

    /// Read-modify-write of one subject's occupancy (caller holds the subject lock)
    fn transition(
        &self,
        subject_id: &SubjectId,
        point: &Coordinate,
        current: Option<&Region>,
        sample_at: DateTime<Utc>,
    ) -> Transitions {
        let mut events = Transitions::new();
        let mut prior = self.store.get(subject_id);
        let current_id = current.map(|r| &r.id);

        if prior.occupied_region_id() == current_id {
            if current_id.is_some() {
                prior.touch(point, sample_at);
                self.store.set(prior);
            }
            debug!(
                subject = %subject_id,
                region = ?current_id.map(|r| r.as_str()),
                "occupancy_unchanged"
            );
            return events;
        }

        // Exit half: read prior.visit before the store is overwritten
        if let Some(visit) = prior.visit.as_ref() {
            let exit_at = self.config.exit_timestamp(&prior, visit, sample_at);
            let duration = dwell_minutes(visit.entry_timestamp, exit_at);

            info!(
                subject = %subject_id,
                region = %visit.region_id,
                entered_at = %visit.entry_timestamp,
                exited_at = %exit_at,
                duration_minutes = %duration,
                "geofence_exit"
            );

            self.metrics.record_exit(duration as u64);
            events.push(TransitionEvent::exit(
                subject_id.clone(),
                visit.region_id.clone(),
                exit_at,
                point,
                duration,
            ));
            self.store.clear(subject_id);
        }

        // Entry half
        if let Some(region) = current {
            info!(
                subject = %subject_id,
                region = %region.id,
                name = ?region.name,
                entered_at = %sample_at,
                "geofence_entry"
            );

            self.metrics.record_entry();
            events.push(TransitionEvent::entry(
                subject_id.clone(),
                region.id.clone(),
                sample_at,
                point,
            ));
            self.store.set(SubjectOccupancy::entered(
                subject_id.clone(),
                region.id.clone(),
                point,
                sample_at,
            ));
        }

        match (prior.visit.is_some(), current.is_some()) {
            (false, true) => self.metrics.record_subject_occupied(),
            (true, false) => self.metrics.record_subject_vacated(),
            (true, true) => self.metrics.record_handoff(),
            (false, false) => {}
        }

        events
    }

    /// Sample timestamp, or processing time if the source gave none
    fn sample_timestamp(&self, subject_id: &SubjectId, point: &Coordinate) -> DateTime<Utc> {
        match point.timestamp {
            Some(ts) => ts,
            None => {
                let now = self.clock.now();
                warn!(subject = %subject_id, fallback = %now, "sample_timestamp_missing");
                self.metrics.record_clock_fallback();
                now
            }
        }
    }

    fn emit(&self, event: TransitionEvent) {
        let Some(emitter) = self.emitter.as_ref() else {
            return;
        };
        let event_id = event.event_id.clone();
        let kind = event.event_type;
        if let Err(e) = emitter.emit(event) {
            warn!(
                event_id = %event_id,
                event_type = %kind.as_str(),
                error = %e,
                "transition_emit_failed"
            );
            self.metrics.record_emit_failure();
        }
    }

    /// Current occupancy record for a subject
    pub fn occupancy(&self, subject_id: &SubjectId) -> SubjectOccupancy {
        self.store.get(subject_id)
    }

    /// Number of subjects currently inside a region
    pub fn occupied_subjects(&self) -> usize {
        self.store.occupied_count()
    }

    /// Discard all occupancy state
    ///
    /// Administrative only: in-flight visits are dropped without exit events.
    pub fn reset_all(&self) {
        let occupied = self.store.occupied_count();
        self.store.clear_all();
        self.metrics.set_occupied_subjects(0);
        warn!(discarded_visits = %occupied, "occupancy_state_reset");
    }
}
