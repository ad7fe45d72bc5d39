use serde::{Deserialize, Serialize};

/// Geofence reference point held on an actor's profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorLocation {
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
}

impl AnchorLocation {
    pub fn new(lat: f64, lng: f64, radius_meters: f64) -> Self {
        Self {
            lat,
            lng,
            radius_meters,
        }
    }
}

/// Anchor columns as stored on a profile; any of them may be unset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfileAnchor {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_meters: Option<f64>,
}

impl ProfileAnchor {
    /// `None` when the profile has no coordinates, which disables the geofence.
    /// A missing or non-positive radius falls back to `default_radius`.
    pub fn resolve(&self, default_radius: f64) -> Option<AnchorLocation> {
        let (lat, lng) = (self.lat?, self.lng?);
        let radius = self
            .radius_meters
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(default_radius);
        Some(AnchorLocation::new(lat, lng, radius))
    }
}
