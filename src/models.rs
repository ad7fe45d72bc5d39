use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::model::attendance::{AttendanceRecord, AttendanceStatus};
use crate::model::check_in::CheckInRecord;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8, // role id
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AckStatus {
    Ack,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MarkAttendanceReq {
    #[schema(example = 1042)]
    pub student_id: u64,
    pub status: AttendanceStatus,
    /// Defaults to today; set by devices replaying an offline mark.
    #[schema(example = "2026-10-18", format = "date", value_type = Option<String>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MarkAttendanceResponse {
    pub status: AckStatus,
    /// False when the write repeated the current status.
    pub state_changed: bool,
    pub record: AttendanceRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckInReq {
    /// Defaults to the caller; only admins may check in someone else.
    #[schema(example = 12)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[schema(example = "2026-10-18", format = "date", value_type = Option<String>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[schema(example = "08:02:11", value_type = Option<String>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_time: Option<NaiveTime>,
    /// `{"lat": .., "lng": ..}`; kept loose so bad input becomes a rejection, not a 400.
    #[schema(value_type = Object, example = json!({"lat": 23.8103, "lng": 90.4125}))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckInResponse {
    pub status: AckStatus,
    /// DUPLICATE, OUT_OF_RANGE or INVALID_LOCATION
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<CheckInRecord>,
}
