//! Great-circle distance on a spherical Earth
//!
//! No validation: out-of-range or non-finite inputs produce meaningless distances
//! rather than errors. Samples are checked at the ingestion boundary instead.

use crate::domain::types::GeoPoint;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters
#[inline]
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}
