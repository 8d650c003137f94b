//! Region containment resolution
//!
//! Regions may overlap (a "home" region around a smaller "bedroom" region).
//! Resolution is first-match in the order supplied, not best-fit: callers set
//! priority by ordering the list.

use crate::domain::geo::distance_meters;
use crate::domain::types::{GeoPoint, Region};

/// Whether `point` lies inside `region` (boundary inclusive)
#[inline]
pub fn contains(region: &Region, point: GeoPoint) -> bool {
    distance_meters(point, region.center()) <= region.radius_meters
}

/// Return the first region in `regions` that contains `point`
pub fn resolve(point: GeoPoint, regions: &[Region]) -> Option<&Region> {
    regions.iter().find(|region| contains(region, point))
}
