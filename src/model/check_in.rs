use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::attendance::AttendanceStatus;

/// Reported GPS position. Trusted as sent, but must be a real coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    #[schema(example = 23.8103)]
    pub lat: f64,
    #[schema(example = 90.4125)]
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rejects NaN/infinite values and anything outside [-90, 90] x [-180, 180].
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err("coordinates must be finite numbers".to_string());
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(format!("longitude {} out of range", self.lng));
        }
        Ok(())
    }
}

/// Staff check-in ledger entry. First writer per (user, day) wins; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckInRecord {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 12)]
    pub user_id: u64,
    #[schema(example = "2026-10-18", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "08:02:11", value_type = String)]
    pub check_in_time: NaiveTime,
    pub location: Location,
    #[schema(nullable = true)]
    pub photo_ref: Option<String>,
    pub status: AttendanceStatus,
}

/// A check-in about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheckIn {
    pub user_id: u64,
    pub date: NaiveDate,
    pub check_in_time: NaiveTime,
    pub location: Location,
    pub photo_ref: Option<String>,
    pub status: AttendanceStatus,
}

/// Reads `{"lat": .., "lng": ..}` where each value is a number or a numeric string.
pub fn parse_location(value: &serde_json::Value) -> Result<Location, String> {
    fn coordinate(value: &serde_json::Value, field: &str) -> Result<f64, String> {
        match value.get(field) {
            Some(serde_json::Value::Number(n)) => {
                n.as_f64().ok_or_else(|| format!("{} is not a number", field))
            }
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("{} is not a number", field)),
            Some(_) => Err(format!("{} is not a number", field)),
            None => Err(format!("{} is missing", field)),
        }
    }

    if !value.is_object() {
        return Err("location must be an object".to_string());
    }
    let location = Location::new(coordinate(value, "lat")?, coordinate(value, "lng")?);
    location.validate()?;
    Ok(location)
}
