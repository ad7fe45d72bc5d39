//! The authoritative attendance ledger.
//!
//! Two write paths with deliberately different conflict policies:
//! student marks are last-writer-wins upserts, staff check-ins are
//! first-writer-wins inserts. Fan-out and notifications only follow a real
//! state change and never decide the outcome of the write.

pub mod memory;
pub mod mysql;
pub mod store;

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::auth::AuthUser;
use crate::error::{LedgerError, Result};
use crate::fanout::{Broadcaster, PushEvent};
use crate::geofence::{self, GeofenceVerdict};
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, WriteEffect};
use crate::model::check_in::{CheckInRecord, Location, NewCheckIn};
use crate::notify::NotificationPipeline;
use store::{CheckInInsert, Directory, LedgerStore, NewMark};

/// Check-in rules that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CheckInPolicy {
    /// Used when a profile has an anchor point but no radius.
    pub default_radius_meters: f64,
    /// Check-ins strictly after this time of day are recorded as Late.
    pub late_after: NaiveTime,
}

impl CheckInPolicy {
    pub fn status_at(&self, time: NaiveTime) -> AttendanceStatus {
        if time > self.late_after {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    pub effect: WriteEffect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// The day is already recorded. Success-equivalent for replays.
    Duplicate,
    OutOfRange {
        distance_meters: f64,
        allowed_radius: f64,
    },
    InvalidLocation {
        detail: String,
    },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Duplicate => "DUPLICATE",
            Rejection::OutOfRange { .. } => "OUT_OF_RANGE",
            Rejection::InvalidLocation { .. } => "INVALID_LOCATION",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::Duplicate => "Already checked in today".to_string(),
            Rejection::OutOfRange {
                distance_meters,
                allowed_radius,
            } => format!(
                "You are {:.0} m away; allowed {:.0} m",
                distance_meters, allowed_radius
            ),
            Rejection::InvalidLocation { detail } => format!("Invalid location: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    Ack(CheckInRecord),
    Rejected(Rejection),
}

/// A check-in as submitted, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckInCommand {
    pub date: Option<NaiveDate>,
    pub check_in_time: Option<NaiveTime>,
    /// Missing, or not a pair of numbers, is a terminal validation rejection.
    pub location: Option<std::result::Result<Location, String>>,
    pub photo_ref: Option<String>,
}

/// Everything a newly connected dashboard needs before following the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    pub attendance: Vec<AttendanceRecord>,
    pub check_ins: Vec<CheckInRecord>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn Directory>,
    broadcaster: Broadcaster,
    notifier: Arc<NotificationPipeline>,
    policy: CheckInPolicy,
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn Directory>,
        broadcaster: Broadcaster,
        notifier: Arc<NotificationPipeline>,
        policy: CheckInPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            broadcaster,
            notifier,
            policy,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Upsert on (student, day). Safe to repeat; a repeated status is a no-op
    /// that triggers nothing downstream.
    #[instrument(name = "mark_attendance", skip(self, actor), fields(actor = actor.user_id))]
    pub async fn mark_attendance(
        &self,
        actor: &AuthUser,
        student_id: u64,
        status: AttendanceStatus,
        date: Option<NaiveDate>,
    ) -> Result<MarkOutcome> {
        actor.require_staff_or_admin()?;

        let student = self
            .directory
            .student(student_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("student {}", student_id)))?;

        let (record, effect) = self
            .store
            .upsert_attendance(NewMark {
                student_id,
                class_id: student.class_id,
                date: date.unwrap_or_else(today),
                status,
                marked_by: actor.user_id,
            })
            .await?;

        if effect.is_state_change() {
            self.broadcaster.publish(PushEvent::AttendanceUpdate {
                student_id,
                status: record.status,
                date: record.date,
            });
            self.notifier.dispatch(record.clone());
        }

        Ok(MarkOutcome { record, effect })
    }

    /// Validate, geofence, then a single insert guarded by (user, day).
    #[instrument(name = "check_in", skip(self, actor, command), fields(actor = actor.user_id))]
    pub async fn check_in(
        &self,
        actor: &AuthUser,
        user_id: u64,
        command: CheckInCommand,
    ) -> Result<CheckInOutcome> {
        actor.require_self_or_admin(user_id)?;

        let location = match command.location {
            Some(Ok(location)) => location,
            Some(Err(detail)) => {
                return Ok(CheckInOutcome::Rejected(Rejection::InvalidLocation { detail }));
            }
            None => {
                return Ok(CheckInOutcome::Rejected(Rejection::InvalidLocation {
                    detail: "location is required".to_string(),
                }));
            }
        };
        if let Err(detail) = location.validate() {
            return Ok(CheckInOutcome::Rejected(Rejection::InvalidLocation { detail }));
        }

        let anchor = self
            .directory
            .anchor_for(user_id)
            .await?
            .and_then(|profile| profile.resolve(self.policy.default_radius_meters));

        if let GeofenceVerdict::Reject {
            distance_meters,
            allowed_radius,
        } = geofence::validate(location.lat, location.lng, anchor.as_ref())
        {
            info!(user_id, distance_meters, allowed_radius, "Check-in outside geofence");
            return Ok(CheckInOutcome::Rejected(Rejection::OutOfRange {
                distance_meters,
                allowed_radius,
            }));
        }

        let check_in_time = command
            .check_in_time
            .unwrap_or_else(|| Local::now().time());

        let inserted = self
            .store
            .insert_check_in(NewCheckIn {
                user_id,
                date: command.date.unwrap_or_else(today),
                check_in_time,
                location,
                photo_ref: command.photo_ref,
                status: self.policy.status_at(check_in_time),
            })
            .await?;

        match inserted {
            CheckInInsert::Inserted(record) => {
                self.broadcaster.publish(PushEvent::StaffUpdate {
                    user_id,
                    status: record.status,
                    date: record.date,
                });
                Ok(CheckInOutcome::Ack(record))
            }
            CheckInInsert::Duplicate => {
                info!(user_id, "Duplicate check-in for the day");
                Ok(CheckInOutcome::Rejected(Rejection::Duplicate))
            }
        }
    }

    /// Explicit student removal; cascades to the student's attendance rows.
    pub async fn remove_student(&self, actor: &AuthUser, student_id: u64) -> Result<()> {
        actor.require_admin()?;

        if !self.store.remove_student(student_id).await? {
            return Err(LedgerError::NotFound(format!("student {}", student_id)));
        }
        self.broadcaster
            .publish(PushEvent::StudentDeleted { student_id });
        Ok(())
    }

    pub async fn snapshot(&self, date: NaiveDate) -> Result<DaySnapshot> {
        Ok(DaySnapshot {
            date,
            attendance: self.store.attendance_for_day(date).await?,
            check_ins: self.store.check_ins_for_day(date).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{Delivery, Observer, Published};
    use crate::ledger::memory::MemoryStore;
    use crate::model::anchor::ProfileAnchor;
    use crate::model::role::Role;
    use crate::model::student::{Guardian, Student};
    use std::time::Duration;

    const SCHOOL: (f64, f64) = (23.8103, 90.4125);

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Ledger,
        observer: Observer,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .add_student(Student {
                id: 1,
                name: "Nadia".into(),
                class_id: 7,
                parent_id: Some(40),
                parent_phone: None,
            })
            .await;
        store
            .add_guardian(Guardian {
                id: 40,
                name: "Farhana".into(),
                email: Some("parent@gmail.com".into()),
                phone: None,
            })
            .await;
        store
            .set_anchor(
                12,
                ProfileAnchor {
                    lat: Some(SCHOOL.0),
                    lng: Some(SCHOOL.1),
                    radius_meters: Some(200.0),
                },
            )
            .await;

        let broadcaster = Broadcaster::new(32);
        let observer = broadcaster.subscribe();
        let notifier = Arc::new(NotificationPipeline::new(
            store.clone(),
            store.clone(),
            None,
            vec![],
            Duration::from_secs(60),
        ));
        let ledger = Ledger::new(
            store.clone(),
            store.clone(),
            broadcaster,
            notifier,
            CheckInPolicy {
                default_radius_meters: 150.0,
                late_after: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            },
        );
        Fixture {
            store,
            ledger,
            observer,
        }
    }

    fn teacher() -> AuthUser {
        AuthUser::new(12, "teacher", Role::Teacher)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn at_school(time: (u32, u32)) -> CheckInCommand {
        CheckInCommand {
            date: Some(day()),
            check_in_time: NaiveTime::from_hms_opt(time.0, time.1, 0),
            location: Some(Ok(Location::new(SCHOOL.0, SCHOOL.1))),
            photo_ref: None,
        }
    }

    async fn wait_for_inbox(store: &MemoryStore, count: usize) {
        for _ in 0..100 {
            if store.inbox().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("inbox never reached {count} messages");
    }

    #[tokio::test]
    async fn repeated_mark_is_one_record_and_one_notification() {
        let mut fx = fixture().await;

        let first = fx
            .ledger
            .mark_attendance(&teacher(), 1, AttendanceStatus::Present, Some(day()))
            .await
            .unwrap();
        assert_eq!(first.effect, WriteEffect::Inserted);
        wait_for_inbox(&fx.store, 1).await;

        let second = fx
            .ledger
            .mark_attendance(&teacher(), 1, AttendanceStatus::Present, Some(day()))
            .await
            .unwrap();
        assert_eq!(second.effect, WriteEffect::Unchanged);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(fx.store.attendance_count().await, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.store.inbox().await.len(), 1);

        assert!(matches!(fx.observer.try_recv(), Some(Delivery::Event(_))));
        assert_eq!(fx.observer.try_recv(), None);
    }

    #[tokio::test]
    async fn correction_overwrites_and_notifies_again() {
        let mut fx = fixture().await;
        fx.ledger
            .mark_attendance(&teacher(), 1, AttendanceStatus::Present, Some(day()))
            .await
            .unwrap();
        let corrected = fx
            .ledger
            .mark_attendance(&teacher(), 1, AttendanceStatus::Absent, Some(day()))
            .await
            .unwrap();

        assert_eq!(
            corrected.effect,
            WriteEffect::Changed {
                previous: AttendanceStatus::Present
            }
        );
        assert_eq!(corrected.record.status, AttendanceStatus::Absent);
        assert_eq!(fx.store.attendance_count().await, 1);
        wait_for_inbox(&fx.store, 2).await;

        let mut statuses = Vec::new();
        while let Some(Delivery::Event(p)) = fx.observer.try_recv() {
            if let PushEvent::AttendanceUpdate { status, .. } = p.event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![AttendanceStatus::Present, AttendanceStatus::Absent]);
    }

    #[tokio::test]
    async fn marking_requires_staff_role_and_known_student() {
        let fx = fixture().await;
        let guardian = AuthUser::new(40, "parent", Role::Guardian);
        assert!(matches!(
            fx.ledger
                .mark_attendance(&guardian, 1, AttendanceStatus::Present, None)
                .await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            fx.ledger
                .mark_attendance(&teacher(), 999, AttendanceStatus::Present, None)
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn first_check_in_wins() {
        let mut fx = fixture().await;

        let CheckInOutcome::Ack(first) = fx
            .ledger
            .check_in(&teacher(), 12, at_school((8, 5)))
            .await
            .unwrap()
        else {
            panic!("first check-in should be acknowledged");
        };
        assert_eq!(first.status, AttendanceStatus::Present);

        let second = fx
            .ledger
            .check_in(&teacher(), 12, at_school((9, 45)))
            .await
            .unwrap();
        assert_eq!(second, CheckInOutcome::Rejected(Rejection::Duplicate));

        let snapshot = fx.ledger.snapshot(day()).await.unwrap();
        assert_eq!(snapshot.check_ins, vec![first]);

        // only the first produced a staff_update
        assert!(matches!(
            fx.observer.try_recv(),
            Some(Delivery::Event(Published { event: PushEvent::StaffUpdate { .. }, .. }))
        ));
        assert_eq!(fx.observer.try_recv(), None);
    }

    #[tokio::test]
    async fn late_check_in_is_recorded_late() {
        let fx = fixture().await;
        let outcome = fx
            .ledger
            .check_in(&teacher(), 12, at_school((9, 1)))
            .await
            .unwrap();
        let CheckInOutcome::Ack(record) = outcome else {
            panic!("expected ack");
        };
        assert_eq!(record.status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn out_of_range_check_in_reports_distance() {
        let fx = fixture().await;
        let command = CheckInCommand {
            location: Some(Ok(Location::new(SCHOOL.0 + 0.01, SCHOOL.1))),
            ..at_school((8, 0))
        };
        let outcome = fx.ledger.check_in(&teacher(), 12, command).await.unwrap();
        let CheckInOutcome::Rejected(Rejection::OutOfRange {
            distance_meters,
            allowed_radius,
        }) = outcome
        else {
            panic!("expected out of range, got {outcome:?}");
        };
        assert!(distance_meters > 1000.0);
        assert_eq!(allowed_radius, 200.0);
        assert!(fx.ledger.snapshot(day()).await.unwrap().check_ins.is_empty());
    }

    #[tokio::test]
    async fn no_anchor_skips_the_geofence() {
        let fx = fixture().await;
        let staff = AuthUser::new(77, "driver", Role::Staff);
        let command = CheckInCommand {
            location: Some(Ok(Location::new(-33.86, 151.2))),
            ..at_school((7, 30))
        };
        assert!(matches!(
            fx.ledger.check_in(&staff, 77, command).await.unwrap(),
            CheckInOutcome::Ack(_)
        ));
    }

    #[tokio::test]
    async fn missing_or_bad_location_is_invalid() {
        let fx = fixture().await;
        for location in [
            None,
            Some(Err("lat is not a number".to_string())),
            Some(Ok(Location::new(91.0, 0.0))),
        ] {
            let command = CheckInCommand {
                location,
                ..at_school((8, 0))
            };
            let outcome = fx.ledger.check_in(&teacher(), 12, command).await.unwrap();
            assert!(
                matches!(outcome, CheckInOutcome::Rejected(Rejection::InvalidLocation { .. })),
                "got {outcome:?}"
            );
        }
    }

    #[tokio::test]
    async fn check_in_for_someone_else_needs_admin() {
        let fx = fixture().await;
        let other = AuthUser::new(13, "other", Role::Staff);
        assert!(matches!(
            fx.ledger.check_in(&other, 12, at_school((8, 0))).await,
            Err(LedgerError::Forbidden(_))
        ));

        let admin = AuthUser::new(1, "admin", Role::Admin);
        assert!(matches!(
            fx.ledger.check_in(&admin, 12, at_school((8, 0))).await.unwrap(),
            CheckInOutcome::Ack(_)
        ));
    }

    #[tokio::test]
    async fn removing_a_student_cascades_and_publishes() {
        let mut fx = fixture().await;
        fx.ledger
            .mark_attendance(&teacher(), 1, AttendanceStatus::Absent, Some(day()))
            .await
            .unwrap();
        let _ = fx.observer.try_recv();

        let admin = AuthUser::new(1, "admin", Role::Admin);
        fx.ledger.remove_student(&admin, 1).await.unwrap();

        assert_eq!(fx.store.attendance_count().await, 0);
        assert_eq!(
            fx.observer.try_recv(),
            Some(Delivery::Event(Published {
                seq: 2,
                event: PushEvent::StudentDeleted { student_id: 1 }
            }))
        );
        assert!(matches!(
            fx.ledger.remove_student(&admin, 1).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
