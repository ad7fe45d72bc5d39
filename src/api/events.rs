//! SSE stream of ledger changes for dashboards.

use std::convert::Infallible;
use std::time::Duration;

use actix_web::{HttpResponse, Responder, web};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tracing::{info, warn};

use crate::auth::auth::AuthUser;
use crate::fanout::Published;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// First frame on every connection: fetch the snapshot, then apply events.
const READY_FRAME: &str = "event: ready\ndata: {}\n\n";

fn frame_for(item: Result<Published, BroadcastStreamRecvError>) -> String {
    match item {
        Ok(published) => published.to_sse_frame(),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Dashboard observer lagged; asking it to resync");
            format!("event: resync\ndata: {{\"skipped\":{}}}\n\n", skipped)
        }
    }
}

/// Follow ledger changes
#[utoipa::path(
    get,
    path = "/api/events",
    responses(
        (status = 200, description = "text/event-stream of attendance_update, staff_update and student_deleted events; `resync` means events were dropped and the snapshot should be reloaded"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Staff/Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Events"
)]
pub async fn event_stream(
    auth: AuthUser,
    state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    auth.require_staff_or_admin()?;

    let broadcaster = state.ledger.broadcaster();
    let updates = BroadcastStream::new(broadcaster.raw_receiver()).map(frame_for);
    let keep_alive = IntervalStream::new(tokio::time::interval(KEEP_ALIVE_INTERVAL))
        .map(|_| ": keep-alive\n\n".to_string());

    let stream = tokio_stream::once(READY_FRAME.to_string())
        .chain(updates.merge(keep_alive))
        .map(|frame| Ok::<_, Infallible>(web::Bytes::from(frame)));

    info!(
        user_id = auth.user_id,
        observers = broadcaster.observer_count(),
        "Dashboard connected"
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}
