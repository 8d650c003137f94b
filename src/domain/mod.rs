//! Domain models - core value types and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `Coordinate` - one positional sample for a tracked subject
//! - `Region` - a named circular geofence
//! - `SubjectOccupancy` - the region a subject currently occupies
//! - `TransitionEvent` - an entry or exit record
//! - `geo` - haversine great-circle distance

pub mod geo;
pub mod types;

// Re-export commonly used types at module level
pub use geo::distance_meters;
pub use types::{
    ActiveVisit, Coordinate, GeoPoint, Region, RegionId, SubjectId, SubjectOccupancy,
    TransitionEvent, TransitionKind,
};
