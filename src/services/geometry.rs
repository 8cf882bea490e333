//! Great-circle distance and geofence polygon membership.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Mean earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Minimum number of vertices for a polygon to enable geofencing.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// WGS84 coordinate pair expressed in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point from latitude and longitude in degrees.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both coordinates are finite and within their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Haversine distance between two points, in meters.
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push `h` slightly above 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Whether the polygon has enough vertices to act as a geofence.
pub fn geofence_enabled(polygon: &[GeoPoint]) -> bool {
    polygon.len() >= MIN_POLYGON_VERTICES
}

/// Even-odd ray casting test treating longitude as x and latitude as y.
///
/// Returns `false` for degenerate polygons so callers can treat them as
/// "geofencing disabled".
pub fn in_polygon(point: GeoPoint, polygon: &[GeoPoint]) -> bool {
    if !geofence_enabled(polygon) {
        return false;
    }

    let (x, y) = (point.lng, point.lat);
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].lng, polygon[i].lat);
        let (xj, yj) = (polygon[j].lng, polygon[j].lat);

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
