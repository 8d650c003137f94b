//! Shared types for the geofence engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for tracked subject IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for region (place) IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bare latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// One positional observation from the sample source
///
/// `timestamp` is `None` when the source omitted it or sent something unparseable;
/// the detector substitutes processing time in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, accuracy: None, timestamp: None }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// A named circular geofence
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub name: Option<String>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
}

impl Region {
    pub fn new(id: impl Into<String>, center_latitude: f64, center_longitude: f64, radius_meters: f64) -> Self {
        Self { id: RegionId::new(id), name: None, center_latitude, center_longitude, radius_meters }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[inline]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.center_latitude, self.center_longitude)
    }
}

/// The visit a subject is currently inside
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVisit {
    pub region_id: RegionId,
    pub entry_timestamp: DateTime<Utc>,
}

/// Per-subject occupancy record
///
/// The occupied region and its entry timestamp live together in `visit`, so one can
/// never be set without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOccupancy {
    pub subject_id: SubjectId,
    pub visit: Option<ActiveVisit>,
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
}

impl SubjectOccupancy {
    /// Record for a subject that is not inside any region
    pub fn unoccupied(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            visit: None,
            last_seen_timestamp: None,
            last_latitude: None,
            last_longitude: None,
        }
    }

    /// Record for a subject that just entered `region_id` at `point`
    pub fn entered(
        subject_id: SubjectId,
        region_id: RegionId,
        point: &Coordinate,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            visit: Some(ActiveVisit { region_id, entry_timestamp: at }),
            last_seen_timestamp: Some(at),
            last_latitude: Some(point.latitude),
            last_longitude: Some(point.longitude),
        }
    }

    #[inline]
    pub fn occupied_region_id(&self) -> Option<&RegionId> {
        self.visit.as_ref().map(|v| &v.region_id)
    }

    #[inline]
    pub fn entry_timestamp(&self) -> Option<DateTime<Utc>> {
        self.visit.as_ref().map(|v| v.entry_timestamp)
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        self.visit.is_some()
    }

    /// Refresh last-seen fields while the subject stays in the same region
    pub fn touch(&mut self, point: &Coordinate, at: DateTime<Utc>) {
        self.last_seen_timestamp = Some(at);
        self.last_latitude = Some(point.latitude);
        self.last_longitude = Some(point.longitude);
    }
}

/// Kind of occupancy transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Entry,
    Exit,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Entry => "entry",
            TransitionKind::Exit => "exit",
        }
    }
}

/// Entry/exit record handed to the event emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// UUIDv7 (time-sortable)
    pub event_id: String,
    pub subject_id: SubjectId,
    pub region_id: RegionId,
    pub event_type: TransitionKind,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Dwell duration, exits only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
}

impl TransitionEvent {
    pub fn entry(
        subject_id: SubjectId,
        region_id: RegionId,
        timestamp: DateTime<Utc>,
        point: &Coordinate,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            subject_id,
            region_id,
            event_type: TransitionKind::Entry,
            timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            duration_minutes: None,
        }
    }

    pub fn exit(
        subject_id: SubjectId,
        region_id: RegionId,
        timestamp: DateTime<Utc>,
        point: &Coordinate,
        duration_minutes: i64,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            subject_id,
            region_id,
            event_type: TransitionKind::Exit,
            timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            duration_minutes: Some(duration_minutes),
        }
    }

    #[inline]
    pub fn is_entry(&self) -> bool {
        self.event_type == TransitionKind::Entry
    }

    #[inline]
    pub fn is_exit(&self) -> bool {
        self.event_type == TransitionKind::Exit
    }
}

/// Generate a new UUIDv7 (time-sortable)
pub fn new_event_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
