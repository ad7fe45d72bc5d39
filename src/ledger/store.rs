//! Storage seams for the ledger. Uniqueness is enforced by the store itself,
//! so every write method is a single atomic statement against its key.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::model::anchor::ProfileAnchor;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, WriteEffect};
use crate::model::check_in::{CheckInRecord, NewCheckIn};
use crate::model::student::{Guardian, Student};

/// Student attendance mark about to be upserted on (student_id, date).
#[derive(Debug, Clone, PartialEq)]
pub struct NewMark {
    pub student_id: u64,
    pub class_id: u64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInInsert {
    Inserted(CheckInRecord),
    /// (user_id, date) already holds a check-in; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Last-writer-wins upsert. Re-writing the current status leaves the row untouched.
    async fn upsert_attendance(&self, mark: NewMark) -> Result<(AttendanceRecord, WriteEffect)>;

    /// First-writer-wins insert guarded by the (user_id, date) unique key.
    async fn insert_check_in(&self, check_in: NewCheckIn) -> Result<CheckInInsert>;

    async fn attendance_for_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>>;

    async fn check_ins_for_day(&self, date: NaiveDate) -> Result<Vec<CheckInRecord>>;

    /// Removes a student together with their attendance history.
    /// Returns false when the student did not exist.
    async fn remove_student(&self, student_id: u64) -> Result<bool>;
}

/// Read-only view of profiles owned by other parts of the school system.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn student(&self, student_id: u64) -> Result<Option<Student>>;

    async fn anchor_for(&self, user_id: u64) -> Result<Option<ProfileAnchor>>;

    async fn guardian_by_id(&self, guardian_id: u64) -> Result<Option<Guardian>>;

    async fn guardian_by_phone(&self, phone: &str) -> Result<Option<Guardian>>;
}

/// In-app message sink.
#[async_trait]
pub trait Inbox: Send + Sync {
    async fn deliver(&self, recipient_id: u64, student_id: u64, content: &str) -> Result<()>;
}
