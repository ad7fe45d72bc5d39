use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    /// Statuses a guardian is emailed about.
    pub fn is_alerting(&self) -> bool {
        matches!(self, AttendanceStatus::Absent | AttendanceStatus::Late)
    }
}

/// Student attendance ledger entry, one per (student, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceRecord {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1042)]
    pub student_id: u64,
    #[schema(example = 7)]
    pub class_id: u64,
    #[schema(example = "2026-10-18", format = "date", value_type = String)]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[schema(example = 12)]
    pub marked_by: u64,
    #[schema(example = "2026-10-18T08:05:00Z", format = "date-time", value_type = String)]
    pub recorded_at: DateTime<Utc>,
}

/// What a student-attendance upsert did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteEffect {
    Inserted,
    Changed { previous: AttendanceStatus },
    Unchanged,
}

impl WriteEffect {
    pub fn is_state_change(&self) -> bool {
        !matches!(self, WriteEffect::Unchanged)
    }
}
