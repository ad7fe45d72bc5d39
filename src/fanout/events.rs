use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::attendance::AttendanceStatus;

/// State changes observers patch their local view with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    AttendanceUpdate {
        student_id: u64,
        status: AttendanceStatus,
        date: NaiveDate,
    },
    StaffUpdate {
        user_id: u64,
        status: AttendanceStatus,
        date: NaiveDate,
    },
    StudentDeleted {
        student_id: u64,
    },
}

impl PushEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            PushEvent::AttendanceUpdate { .. } => "attendance_update",
            PushEvent::StaffUpdate { .. } => "staff_update",
            PushEvent::StudentDeleted { .. } => "student_deleted",
        }
    }
}

/// A pushed event stamped with its publication sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub seq: u64,
    pub event: PushEvent,
}

impl Published {
    /// Format as an SSE frame.
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(&self.event).unwrap_or_default();
        format!("id: {}\nevent: {}\ndata: {}\n\n", self.seq, self.event.event_name(), data)
    }
}
