use crate::model::attendance::{AttendanceRecord, AttendanceStatus};
use crate::model::check_in::{CheckInRecord, Location};
use crate::models::{
    AckStatus, CheckInReq, CheckInResponse, MarkAttendanceReq, MarkAttendanceResponse,
};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rollcall Attendance API",
        version = "0.1.0",
        description = r#"
## School attendance capture

### 🔹 Writes
- **Student attendance**: one record per student per day; a later mark overwrites the status.
- **Staff check-in**: one record per user per day, geofenced against the user's anchor point.
  A second check-in the same day returns `Rejected` / `DUPLICATE` and changes nothing.

### 📡 Live updates
`GET /api/events` streams `attendance_update`, `staff_update` and `student_deleted`
as Server-Sent Events. Load `GET /api/attendance/today` first; there is no replay.

### 📴 Offline devices
Devices queue writes locally and replay them in order once back online. Treat
`DUPLICATE` as done, `OUT_OF_RANGE` / `INVALID_LOCATION` as final, and 5xx as retry later.
"#,
    ),
    paths(
        crate::api::attendance::mark_attendance,
        crate::api::attendance::check_in,
        crate::api::attendance::day_snapshot,
        crate::api::events::event_stream,
        crate::api::students::delete_student,
    ),
    components(
        schemas(
            AttendanceStatus,
            AttendanceRecord,
            CheckInRecord,
            Location,
            AckStatus,
            MarkAttendanceReq,
            MarkAttendanceResponse,
            CheckInReq,
            CheckInResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Attendance capture APIs"),
        (name = "Events", description = "Real-time ledger updates"),
        (name = "Students", description = "Student removal"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
