pub mod attendance;
pub mod events;
pub mod students;

use actix_web::{HttpResponse, Responder, get};
use serde_json::json;

/// Liveness probe; devices poll it to detect that connectivity is back.
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}
