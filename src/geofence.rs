//! Great-circle distance check of a reported position against an anchor.

use crate::model::anchor::AnchorLocation;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceVerdict {
    Accept,
    Reject {
        distance_meters: f64,
        allowed_radius: f64,
    },
}

impl GeofenceVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, GeofenceVerdict::Accept)
    }
}

/// Haversine distance between two points, in meters.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // rounding can push `a` a hair past 1.0 for antipodal points
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c * 1000.0
}

/// Accepts when no anchor is configured, or when the position lies within the
/// anchor radius (boundary inclusive). Never panics; a NaN distance rejects.
pub fn validate(lat: f64, lng: f64, anchor: Option<&AnchorLocation>) -> GeofenceVerdict {
    let Some(anchor) = anchor else {
        return GeofenceVerdict::Accept;
    };

    let distance = distance_meters(lat, lng, anchor.lat, anchor.lng);
    if distance <= anchor.radius_meters {
        GeofenceVerdict::Accept
    } else {
        GeofenceVerdict::Reject {
            distance_meters: distance,
            allowed_radius: anchor.radius_meters,
        }
    }
}
