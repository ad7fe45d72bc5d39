use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{App, test};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use rollcall::auth::jwt::generate_access_token;
use rollcall::config::Config;
use rollcall::ledger::memory::MemoryStore;
use rollcall::model::anchor::ProfileAnchor;
use rollcall::model::student::{Guardian, Student};
use rollcall::notify::mailer::{Mailer, OutgoingEmail};
use rollcall::routes;
use rollcall::state::AppState;

const SECRET: &str = "test-secret";
const SCHOOL: (f64, f64) = (23.8103, 90.4125);

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

fn token(user_id: u64, role: u8) -> String {
    generate_access_token(user_id, format!("user{}", user_id), role, SECRET, 3600).unwrap()
}

fn teacher() -> String {
    token(7, 2)
}

fn admin() -> String {
    token(1, 1)
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .add_student(Student {
            id: 1042,
            name: "Nadia Rahman".into(),
            class_id: 7,
            parent_id: Some(40),
            parent_phone: None,
        })
        .await;
    store
        .add_student(Student {
            id: 1043,
            name: "Arif Hossain".into(),
            class_id: 7,
            parent_id: Some(41),
            parent_phone: None,
        })
        .await;
    store
        .add_guardian(Guardian {
            id: 40,
            name: "Farhana Rahman".into(),
            email: Some("farhana@gmail.com".into()),
            phone: None,
        })
        .await;
    store
        .add_guardian(Guardian {
            id: 41,
            name: "Kamal Hossain".into(),
            email: Some("guardian-41@placeholder.local".into()),
            phone: None,
        })
        .await;
    store
        .set_anchor(
            12,
            ProfileAnchor {
                lat: Some(SCHOOL.0),
                lng: Some(SCHOOL.1),
                radius_meters: Some(150.0),
            },
        )
        .await;
    store
}

macro_rules! app {
    ($store:expr, $mailer:expr) => {{
        let config = Config::for_memory(SECRET);
        let mailer: Arc<dyn Mailer> = $mailer;
        let state = AppState::with_mailer($store, &config, Some(mailer));
        let routes_config = config.clone();
        test::init_service(
            App::new()
                .app_data(Data::new(state))
                .app_data(Data::new(config))
                .configure(move |cfg| routes::configure(cfg, routes_config.clone())),
        )
        .await
    }};
}

/// Sends a request and returns the status with the JSON body (Null when empty).
macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let bytes = test::read_body(resp).await;
        (
            status,
            serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null),
        )
    }};
}

fn post(uri: &str, bearer: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", bearer)))
        .set_json(body)
}

/// Notifications run in the background; give them a moment.
async fn wait_for_inbox(store: &MemoryStore, expected: usize) {
    for _ in 0..50 {
        if store.inbox().await.len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[actix_web::test]
async fn first_absent_mark_notifies_guardian_once() {
    let store = seeded_store().await;
    let mailer = Arc::new(RecordingMailer::default());
    let app = app!(store.clone(), mailer.clone());

    let mark = json!({"student_id": 1042, "status": "Absent", "date": "2026-10-18"});
    let (status, body) = call!(app, post("/api/attendance/mark", &teacher(), mark.clone()));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Ack");
    assert_eq!(body["state_changed"], true);
    assert_eq!(body["record"]["status"], "Absent");

    // same mark again: accepted, nothing downstream
    let (status, body) = call!(app, post("/api/attendance/mark", &teacher(), mark));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state_changed"], false);

    wait_for_inbox(&store, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.attendance_count().await, 1);
    let inbox = store.inbox().await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].recipient_id, 40);
    assert_eq!(inbox[0].student_id, 1042);

    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "farhana@gmail.com");
    assert!(sent[0].subject.contains("Absent"));
}

#[actix_web::test]
async fn placeholder_email_gets_in_app_only_and_present_never_emails() {
    let store = seeded_store().await;
    let mailer = Arc::new(RecordingMailer::default());
    let app = app!(store.clone(), mailer.clone());

    let (status, _) = call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1043, "status": "Absent", "date": "2026-10-18"}),
        )
    );
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1042, "status": "Present", "date": "2026-10-18"}),
        )
    );
    assert_eq!(status, StatusCode::OK);

    wait_for_inbox(&store, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.inbox().await.len(), 2);
    assert!(mailer.sent.lock().await.is_empty());
}

#[actix_web::test]
async fn later_mark_overwrites_status() {
    let store = seeded_store().await;
    let app = app!(store.clone(), Arc::new(RecordingMailer::default()));

    call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1042, "status": "Absent", "date": "2026-10-18"}),
        )
    );
    let (_, body) = call!(
        app,
        post(
            "/api/attendance/mark",
            &admin(),
            json!({"student_id": 1042, "status": "Late", "date": "2026-10-18"}),
        )
    );

    assert_eq!(body["state_changed"], true);
    assert_eq!(body["record"]["status"], "Late");
    assert_eq!(body["record"]["marked_by"], 1);
    assert_eq!(store.attendance_count().await, 1);
}

#[actix_web::test]
async fn guardians_cannot_mark_and_unknown_students_are_404() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    let (status, body) = call!(
        app,
        post(
            "/api/attendance/mark",
            &token(40, 4),
            json!({"student_id": 1042, "status": "Present"}),
        )
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let (status, _) = call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 9999, "status": "Present"}),
        )
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn missing_token_is_401() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    let req = test::TestRequest::post()
        .uri("/api/attendance/mark")
        .peer_addr(peer())
        .set_json(json!({"student_id": 1042, "status": "Present"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn check_in_first_writer_wins() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));
    let staff = token(12, 3);

    let first = json!({
        "date": "2026-10-18",
        "check_in_time": "08:01:00",
        "location": {"lat": SCHOOL.0, "lng": SCHOOL.1}
    });
    let (status, body) = call!(app, post("/api/attendance/check-in", &staff, first));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Ack");
    assert_eq!(body["record"]["check_in_time"], "08:01:00");
    assert_eq!(body["record"]["status"], "Present");

    let second = json!({
        "date": "2026-10-18",
        "check_in_time": "10:30:00",
        "location": {"lat": SCHOOL.0, "lng": SCHOOL.1}
    });
    let (status, body) = call!(app, post("/api/attendance/check-in", &staff, second));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Rejected");
    assert_eq!(body["reason"], "DUPLICATE");
    assert!(body.get("record").is_none());
}

#[actix_web::test]
async fn check_in_outside_geofence_is_rejected_with_distance() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    // roughly 1.1 km north of the anchor
    let (status, body) = call!(
        app,
        post(
            "/api/attendance/check-in",
            &token(12, 3),
            json!({
                "date": "2026-10-18",
                "location": {"lat": SCHOOL.0 + 0.01, "lng": SCHOOL.1}
            }),
        )
    );
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reason"], "OUT_OF_RANGE");
    assert_eq!(body["allowed_radius"], 150.0);
    let distance = body["distance_meters"].as_f64().unwrap();
    assert!(distance > 1000.0 && distance < 1200.0, "distance {}", distance);
}

#[actix_web::test]
async fn check_in_with_bad_location_is_invalid() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    let (status, body) = call!(
        app,
        post(
            "/api/attendance/check-in",
            &token(12, 3),
            json!({"date": "2026-10-18", "location": {"lat": "north", "lng": 90.0}}),
        )
    );
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reason"], "INVALID_LOCATION");

    let (status, body) = call!(
        app,
        post(
            "/api/attendance/check-in",
            &token(12, 3),
            json!({"date": "2026-10-18"}),
        )
    );
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reason"], "INVALID_LOCATION");
}

#[actix_web::test]
async fn staff_cannot_check_in_for_someone_else() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    let (status, _) = call!(
        app,
        post(
            "/api/attendance/check-in",
            &token(13, 3),
            json!({"user_id": 12, "location": {"lat": SCHOOL.0, "lng": SCHOOL.1}}),
        )
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn deleting_a_student_removes_their_attendance() {
    let store = seeded_store().await;
    let app = app!(store.clone(), Arc::new(RecordingMailer::default()));

    call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1042, "status": "Present", "date": "2026-10-18"}),
        )
    );
    assert_eq!(store.attendance_count().await, 1);

    let delete = |bearer: String| {
        test::TestRequest::delete()
            .uri("/api/students/1042")
            .peer_addr(peer())
            .insert_header(("Authorization", format!("Bearer {}", bearer)))
            .to_request()
    };

    let resp = test::call_service(&app, delete(teacher())).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(&app, delete(admin())).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.attendance_count().await, 0);

    let (status, _) = call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1042, "status": "Present", "date": "2026-10-18"}),
        )
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn snapshot_lists_the_day() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    call!(
        app,
        post(
            "/api/attendance/mark",
            &teacher(),
            json!({"student_id": 1042, "status": "Late", "date": "2026-10-18"}),
        )
    );
    call!(
        app,
        post(
            "/api/attendance/check-in",
            &token(12, 3),
            json!({
                "date": "2026-10-18",
                "check_in_time": "09:45:00",
                "location": {"lat": SCHOOL.0, "lng": SCHOOL.1}
            }),
        )
    );

    let req = test::TestRequest::get()
        .uri("/api/attendance/today?date=2026-10-18")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", teacher())))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["date"], "2026-10-18");
    assert_eq!(body["attendance"][0]["student_id"], 1042);
    assert_eq!(body["attendance"][0]["status"], "Late");
    assert_eq!(body["check_ins"][0]["user_id"], 12);
    // after the 09:00 cutoff
    assert_eq!(body["check_ins"][0]["status"], "Late");
}

#[actix_web::test]
async fn health_is_public() {
    let store = seeded_store().await;
    let app = app!(store, Arc::new(RecordingMailer::default()));

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}
