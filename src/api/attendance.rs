use crate::auth::auth::AuthUser;
use crate::error::LedgerError;
use crate::ledger::{CheckInCommand, CheckInOutcome, Rejection};
use crate::model::check_in::parse_location;
use crate::models::{
    AckStatus, CheckInReq, CheckInResponse, MarkAttendanceReq, MarkAttendanceResponse,
};
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;

fn log_storage_failure(e: LedgerError, what: &str) -> LedgerError {
    if matches!(e, LedgerError::Storage(_) | LedgerError::Unavailable(_)) {
        tracing::error!(error = %e, "{} failed", what);
    }
    e
}

/// Mark a student's attendance for the day (last writer wins)
#[utoipa::path(
    post,
    path = "/api/attendance/mark",
    request_body = MarkAttendanceReq,
    responses(
        (status = 200, description = "Recorded; `state_changed` is false for a repeat", body = MarkAttendanceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Staff/Admin only"),
        (status = 404, description = "Student not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn mark_attendance(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<MarkAttendanceReq>,
) -> actix_web::Result<impl Responder> {
    let payload = payload.into_inner();

    let outcome = state
        .ledger
        .mark_attendance(&auth, payload.student_id, payload.status, payload.date)
        .await
        .map_err(|e| log_storage_failure(e, "Mark attendance"))?;

    Ok(HttpResponse::Ok().json(MarkAttendanceResponse {
        status: AckStatus::Ack,
        state_changed: outcome.effect.is_state_change(),
        record: outcome.record,
    }))
}

/// Staff check-in (first writer wins, geofenced)
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body = CheckInReq,
    responses(
        (status = 200, description = "Checked in, or already checked in today", body = CheckInResponse, example = json!({
            "status": "Rejected",
            "reason": "DUPLICATE",
            "message": "Already checked in today"
        })),
        (status = 422, description = "Outside the geofence or invalid location", body = CheckInResponse, example = json!({
            "status": "Rejected",
            "reason": "OUT_OF_RANGE",
            "message": "You are 412 m away; allowed 150 m",
            "distance_meters": 412.3,
            "allowed_radius": 150.0
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<CheckInReq>,
) -> actix_web::Result<impl Responder> {
    let payload = payload.into_inner();
    let user_id = payload.user_id.unwrap_or(auth.user_id);

    let command = CheckInCommand {
        date: payload.date,
        check_in_time: payload.check_in_time,
        location: payload.location.as_ref().map(parse_location),
        photo_ref: payload.photo_ref,
    };

    let outcome = state
        .ledger
        .check_in(&auth, user_id, command)
        .await
        .map_err(|e| log_storage_failure(e, "Check-in"))?;

    let response = match outcome {
        CheckInOutcome::Ack(record) => HttpResponse::Ok().json(CheckInResponse {
            status: AckStatus::Ack,
            reason: None,
            message: Some("Checked in successfully".to_string()),
            distance_meters: None,
            allowed_radius: None,
            record: Some(record),
        }),
        CheckInOutcome::Rejected(rejection) => {
            let body = rejection_body(&rejection);
            match rejection {
                // informational: the day is already on the ledger
                Rejection::Duplicate => HttpResponse::Ok().json(body),
                _ => HttpResponse::UnprocessableEntity().json(body),
            }
        }
    };
    Ok(response)
}

fn rejection_body(rejection: &Rejection) -> CheckInResponse {
    let (distance_meters, allowed_radius) = match rejection {
        Rejection::OutOfRange {
            distance_meters,
            allowed_radius,
        } => (Some(*distance_meters), Some(*allowed_radius)),
        _ => (None, None),
    };
    CheckInResponse {
        status: AckStatus::Rejected,
        reason: Some(rejection.code().to_string()),
        message: Some(rejection.message()),
        distance_meters,
        allowed_radius,
        record: None,
    }
}

#[derive(Deserialize, IntoParams)]
pub struct SnapshotQuery {
    /// Day to load; defaults to today
    pub date: Option<NaiveDate>,
}

/// Current ledger state for a day. Dashboards load this on connect, then
/// follow `/events`.
#[utoipa::path(
    get,
    path = "/api/attendance/today",
    params(SnapshotQuery),
    responses(
        (status = 200, description = "Student marks and staff check-ins for the day"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Staff/Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn day_snapshot(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<SnapshotQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_staff_or_admin()?;

    let date = query.date.unwrap_or_else(crate::ledger::today);
    let snapshot = state
        .ledger
        .snapshot(date)
        .await
        .map_err(|e| log_storage_failure(e, "Day snapshot"))?;

    Ok(HttpResponse::Ok().json(snapshot))
}
