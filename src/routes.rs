use crate::{
    api::{attendance, events, health, students},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-route limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let per_ms = if requests_per_min == 0 {
            1
        } else {
            (60_000 / requests_per_min as u64).max(1)
        };
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min.max(1))
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .unwrap_or_default();
        Governor::new(&cfg)
    }

    let write_limiter = Arc::new(build_limiter(config.rate_write_per_min));
    let read_limiter = Arc::new(build_limiter(config.rate_read_per_min));

    // Public routes
    cfg.service(health);

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .service(
                web::scope("/attendance")
                    // /attendance/mark
                    .service(
                        web::resource("/mark")
                            .wrap(write_limiter.clone())
                            .route(web::post().to(attendance::mark_attendance)),
                    )
                    // /attendance/check-in
                    .service(
                        web::resource("/check-in")
                            .wrap(write_limiter.clone())
                            .route(web::post().to(attendance::check_in)),
                    )
                    // /attendance/today
                    .service(
                        web::resource("/today")
                            .wrap(read_limiter.clone())
                            .route(web::get().to(attendance::day_snapshot)),
                    ),
            )
            .service(
                web::resource("/events")
                    .wrap(read_limiter.clone())
                    .route(web::get().to(events::event_stream)),
            )
            .service(
                web::resource("/students/{id}")
                    .wrap(write_limiter)
                    .route(web::delete().to(students::delete_student)),
            ),
    );
}

// DEVICE (online)
//  └─ POST /attendance/check-in | /attendance/mark
//       └─ ledger write ─┬─ fan-out  → GET /events (SSE)
//                        └─ notify   → inbox / email
//
// DEVICE (offline)
//  └─ local queue ── on reconnect ──> same POSTs, oldest first
