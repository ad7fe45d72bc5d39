use crate::auth::auth::AuthUser;
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};

/// Remove a student and their attendance history
#[utoipa::path(
    delete,
    path = "/api/students/{student_id}",
    params(
        ("student_id" = u64, Path, description = "ID of the student to remove")
    ),
    responses(
        (status = 204, description = "Removed; `student_deleted` published"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Student not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Students"
)]
pub async fn delete_student(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let student_id = path.into_inner();

    state
        .ledger
        .remove_student(&auth, student_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, student_id, "Student removal failed");
            e
        })?;

    Ok(HttpResponse::NoContent().finish())
}
