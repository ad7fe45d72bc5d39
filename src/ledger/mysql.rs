use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, MySqlPool};
use std::str::FromStr;

use super::store::{CheckInInsert, Directory, Inbox, LedgerStore, NewMark};
use crate::error::Result;
use crate::model::anchor::ProfileAnchor;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, WriteEffect};
use crate::model::check_in::{CheckInRecord, Location, NewCheckIn};
use crate::model::student::{Guardian, Student, normalize_phone};

/// SQLSTATE for integrity constraint violations (duplicate key).
const INTEGRITY_VIOLATION: &str = "23000";

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> std::result::Result<AttendanceStatus, sqlx::Error> {
    AttendanceStatus::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[derive(FromRow)]
struct AttendanceRow {
    id: u64,
    student_id: u64,
    class_id: u64,
    date: NaiveDate,
    status: String,
    previous_status: Option<String>,
    marked_by: u64,
    recorded_at: DateTime<Utc>,
}

impl AttendanceRow {
    fn into_record(self) -> std::result::Result<AttendanceRecord, sqlx::Error> {
        Ok(AttendanceRecord {
            id: self.id,
            student_id: self.student_id,
            class_id: self.class_id,
            date: self.date,
            status: parse_status(&self.status)?,
            marked_by: self.marked_by,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(FromRow)]
struct CheckInRow {
    id: u64,
    user_id: u64,
    date: NaiveDate,
    check_in_time: NaiveTime,
    lat: f64,
    lng: f64,
    photo_ref: Option<String>,
    status: String,
}

impl CheckInRow {
    fn into_record(self) -> std::result::Result<CheckInRecord, sqlx::Error> {
        Ok(CheckInRecord {
            id: self.id,
            user_id: self.user_id,
            date: self.date,
            check_in_time: self.check_in_time,
            location: Location::new(self.lat, self.lng),
            photo_ref: self.photo_ref,
            status: parse_status(&self.status)?,
        })
    }
}

#[derive(FromRow)]
struct GuardianRow {
    id: u64,
    name: String,
    email: Option<String>,
    phone: Option<String>,
}

impl From<GuardianRow> for Guardian {
    fn from(row: GuardianRow) -> Self {
        Guardian {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
        }
    }
}

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, class_id, date, status, previous_status, marked_by, recorded_at";

#[async_trait]
impl LedgerStore for MySqlStore {
    async fn upsert_attendance(&self, mark: NewMark) -> Result<(AttendanceRecord, WriteEffect)> {
        let mut tx = self.pool.begin().await?;

        // previous_status is assigned before status; MySQL evaluates left to right
        sqlx::query(
            r#"
            INSERT INTO student_attendance
                (student_id, class_id, date, status, marked_by, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                previous_status = status,
                marked_by = IF(status = VALUES(status), marked_by, VALUES(marked_by)),
                recorded_at = IF(status = VALUES(status), recorded_at, VALUES(recorded_at)),
                status = VALUES(status)
            "#,
        )
        .bind(mark.student_id)
        .bind(mark.class_id)
        .bind(mark.date)
        .bind(mark.status.as_ref())
        .bind(mark.marked_by)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        // the upsert holds the row lock until commit, so this reads our own write
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM student_attendance WHERE student_id = ? AND date = ?"
        ))
        .bind(mark.student_id)
        .bind(mark.date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let effect = match row.previous_status.as_deref() {
            None => WriteEffect::Inserted,
            Some(prev) => {
                let previous = parse_status(prev)?;
                if previous == mark.status {
                    WriteEffect::Unchanged
                } else {
                    WriteEffect::Changed { previous }
                }
            }
        };

        Ok((row.into_record()?, effect))
    }

    async fn insert_check_in(&self, check_in: NewCheckIn) -> Result<CheckInInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO staff_check_ins (user_id, date, check_in_time, lat, lng, photo_ref, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(check_in.user_id)
        .bind(check_in.date)
        .bind(check_in.check_in_time)
        .bind(check_in.location.lat)
        .bind(check_in.location.lng)
        .bind(check_in.photo_ref.as_deref())
        .bind(check_in.status.as_ref())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(CheckInInsert::Inserted(CheckInRecord {
                id: done.last_insert_id(),
                user_id: check_in.user_id,
                date: check_in.date,
                check_in_time: check_in.check_in_time,
                location: check_in.location,
                photo_ref: check_in.photo_ref,
                status: check_in.status,
            })),
            Err(e) => {
                // Duplicate check-in for same day
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some(INTEGRITY_VIOLATION) {
                        return Ok(CheckInInsert::Duplicate);
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn attendance_for_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM student_attendance WHERE date = ? ORDER BY student_id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(AttendanceRow::into_record)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn check_ins_for_day(&self, date: NaiveDate) -> Result<Vec<CheckInRecord>> {
        let rows = sqlx::query_as::<_, CheckInRow>(
            r#"
            SELECT id, user_id, date, check_in_time, lat, lng, photo_ref, status
            FROM staff_check_ins
            WHERE date = ?
            ORDER BY user_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(CheckInRow::into_record)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn remove_student(&self, student_id: u64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM student_attendance WHERE student_id = ?")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed.rows_affected() > 0)
    }
}

#[async_trait]
impl Directory for MySqlStore {
    async fn student(&self, student_id: u64) -> Result<Option<Student>> {
        let row = sqlx::query_as::<_, (u64, String, u64, Option<u64>, Option<String>)>(
            "SELECT id, name, class_id, parent_id, parent_phone FROM students WHERE id = ?",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, class_id, parent_id, parent_phone)| Student {
            id,
            name,
            class_id,
            parent_id,
            parent_phone,
        }))
    }

    async fn anchor_for(&self, user_id: u64) -> Result<Option<ProfileAnchor>> {
        let row = sqlx::query_as::<_, (Option<f64>, Option<f64>, Option<f64>)>(
            "SELECT anchor_lat, anchor_lng, anchor_radius_m FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(lat, lng, radius_meters)| ProfileAnchor {
            lat,
            lng,
            radius_meters,
        }))
    }

    async fn guardian_by_id(&self, guardian_id: u64) -> Result<Option<Guardian>> {
        let row = sqlx::query_as::<_, GuardianRow>(
            "SELECT id, name, email, phone FROM guardians WHERE id = ?",
        )
        .bind(guardian_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Guardian::from))
    }

    async fn guardian_by_phone(&self, phone: &str) -> Result<Option<Guardian>> {
        let digits = normalize_phone(phone);
        if digits.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, GuardianRow>(
            "SELECT id, name, email, phone FROM guardians WHERE phone_digits = ? ORDER BY id LIMIT 1",
        )
        .bind(digits)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Guardian::from))
    }
}

#[async_trait]
impl Inbox for MySqlStore {
    async fn deliver(&self, recipient_id: u64, student_id: u64, content: &str) -> Result<()> {
        sqlx::query("INSERT INTO notifications (recipient_id, student_id, content) VALUES (?, ?, ?)")
            .bind(recipient_id)
            .bind(student_id)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
