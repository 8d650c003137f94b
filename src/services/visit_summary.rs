//! Per-subject visit summaries
//!
//! Folds a subject's entry/exit history into per-region visit counts and total
//! dwell. An entry with no later exit (visit still open) counts as a visit but
//! adds no dwell.

use crate::domain::types::{RegionId, SubjectId, TransitionEvent, TransitionKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::info;

/// Visit statistics for one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceVisitSummary {
    pub region_id: RegionId,
    pub visits: u64,
    pub total_minutes: i64,
}

/// Summarize one subject's events, most visited first
///
/// Events may arrive in any order; they are sorted by timestamp per region.
pub fn summarize_visits(events: &[TransitionEvent], limit: Option<usize>) -> Vec<PlaceVisitSummary> {
    let mut by_region: FxHashMap<&RegionId, Vec<&TransitionEvent>> = FxHashMap::default();
    for event in events {
        by_region.entry(&event.region_id).or_default().push(event);
    }

    let mut summaries: Vec<PlaceVisitSummary> = by_region
        .into_iter()
        .map(|(region_id, mut region_events)| {
            region_events.sort_by_key(|e| e.timestamp);

            let mut visits = 0u64;
            let mut total_minutes = 0.0f64;
            let mut open_entry: Option<DateTime<Utc>> = None;

            for event in region_events {
                match event.event_type {
                    TransitionKind::Entry => {
                        visits += 1;
                        open_entry = Some(event.timestamp);
                    }
                    TransitionKind::Exit => {
                        if let Some(entered) = open_entry.take() {
                            total_minutes +=
                                (event.timestamp - entered).num_milliseconds() as f64 / 60_000.0;
                        }
                    }
                }
            }

            PlaceVisitSummary {
                region_id: region_id.clone(),
                visits,
                total_minutes: total_minutes.round() as i64,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.visits
            .cmp(&a.visits)
            .then(b.total_minutes.cmp(&a.total_minutes))
            .then(a.region_id.cmp(&b.region_id))
    });
    if let Some(limit) = limit {
        summaries.truncate(limit);
    }
    summaries
}

/// Running history of emitted events, per subject
#[derive(Default)]
pub struct VisitLedger {
    events: Mutex<FxHashMap<SubjectId, Vec<TransitionEvent>>>,
}

impl VisitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &TransitionEvent) {
        self.events.lock().entry(event.subject_id.clone()).or_default().push(event.clone());
    }

    /// Total events recorded across subjects
    pub fn len(&self) -> usize {
        self.events.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary_for(&self, subject_id: &SubjectId, limit: Option<usize>) -> Vec<PlaceVisitSummary> {
        let events = self.events.lock();
        events
            .get(subject_id)
            .map(|history| summarize_visits(history, limit))
            .unwrap_or_default()
    }

    /// Log the top places for every subject seen
    pub fn log_summaries(&self, limit: usize) {
        let mut subjects: Vec<SubjectId> = self.events.lock().keys().cloned().collect();
        subjects.sort();
        for subject in subjects {
            for place in self.summary_for(&subject, Some(limit)) {
                info!(
                    subject = %subject,
                    region = %place.region_id,
                    visits = %place.visits,
                    total_minutes = %place.total_minutes,
                    "visit_summary"
                );
            }
        }
    }
}
