//! In-process store with the same key semantics as the MySQL schema. Backs
//! `STORAGE=memory` and the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use super::store::{CheckInInsert, Directory, Inbox, LedgerStore, NewMark};
use crate::error::Result;
use crate::model::anchor::ProfileAnchor;
use crate::model::attendance::{AttendanceRecord, WriteEffect};
use crate::model::check_in::{CheckInRecord, NewCheckIn};
use crate::model::student::{Guardian, Student, normalize_phone};

#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub recipient_id: u64,
    pub student_id: u64,
    pub content: String,
}

#[derive(Default)]
struct Tables {
    attendance: HashMap<(u64, NaiveDate), AttendanceRecord>,
    check_ins: HashMap<(u64, NaiveDate), CheckInRecord>,
    students: HashMap<u64, Student>,
    guardians: HashMap<u64, Guardian>,
    anchors: HashMap<u64, ProfileAnchor>,
    inbox: Vec<InboxMessage>,
}

/// One lock guards all tables, which makes every write atomic on its key.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn add_student(&self, student: Student) {
        self.tables.lock().await.students.insert(student.id, student);
    }

    pub async fn add_guardian(&self, guardian: Guardian) {
        self.tables.lock().await.guardians.insert(guardian.id, guardian);
    }

    pub async fn set_anchor(&self, user_id: u64, anchor: ProfileAnchor) {
        self.tables.lock().await.anchors.insert(user_id, anchor);
    }

    pub async fn inbox(&self) -> Vec<InboxMessage> {
        self.tables.lock().await.inbox.clone()
    }

    pub async fn attendance_count(&self) -> usize {
        self.tables.lock().await.attendance.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn upsert_attendance(&self, mark: NewMark) -> Result<(AttendanceRecord, WriteEffect)> {
        let mut tables = self.tables.lock().await;
        let key = (mark.student_id, mark.date);

        if let Some(existing) = tables.attendance.get_mut(&key) {
            if existing.status == mark.status {
                return Ok((existing.clone(), WriteEffect::Unchanged));
            }
            let previous = existing.status;
            existing.status = mark.status;
            existing.marked_by = mark.marked_by;
            existing.recorded_at = Utc::now();
            return Ok((existing.clone(), WriteEffect::Changed { previous }));
        }

        let record = AttendanceRecord {
            id: self.allocate_id(),
            student_id: mark.student_id,
            class_id: mark.class_id,
            date: mark.date,
            status: mark.status,
            marked_by: mark.marked_by,
            recorded_at: Utc::now(),
        };
        tables.attendance.insert(key, record.clone());
        Ok((record, WriteEffect::Inserted))
    }

    async fn insert_check_in(&self, check_in: NewCheckIn) -> Result<CheckInInsert> {
        let mut tables = self.tables.lock().await;
        let key = (check_in.user_id, check_in.date);
        if tables.check_ins.contains_key(&key) {
            return Ok(CheckInInsert::Duplicate);
        }

        let record = CheckInRecord {
            id: self.allocate_id(),
            user_id: check_in.user_id,
            date: check_in.date,
            check_in_time: check_in.check_in_time,
            location: check_in.location,
            photo_ref: check_in.photo_ref,
            status: check_in.status,
        };
        tables.check_ins.insert(key, record.clone());
        Ok(CheckInInsert::Inserted(record))
    }

    async fn attendance_for_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .attendance
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.student_id);
        Ok(records)
    }

    async fn check_ins_for_day(&self, date: NaiveDate) -> Result<Vec<CheckInRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .check_ins
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.user_id);
        Ok(records)
    }

    async fn remove_student(&self, student_id: u64) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let existed = tables.students.remove(&student_id).is_some();
        tables.attendance.retain(|(sid, _), _| *sid != student_id);
        Ok(existed)
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn student(&self, student_id: u64) -> Result<Option<Student>> {
        Ok(self.tables.lock().await.students.get(&student_id).cloned())
    }

    async fn anchor_for(&self, user_id: u64) -> Result<Option<ProfileAnchor>> {
        Ok(self.tables.lock().await.anchors.get(&user_id).copied())
    }

    async fn guardian_by_id(&self, guardian_id: u64) -> Result<Option<Guardian>> {
        Ok(self.tables.lock().await.guardians.get(&guardian_id).cloned())
    }

    async fn guardian_by_phone(&self, phone: &str) -> Result<Option<Guardian>> {
        let wanted = normalize_phone(phone);
        if wanted.is_empty() {
            return Ok(None);
        }
        let tables = self.tables.lock().await;
        let mut matches: Vec<_> = tables
            .guardians
            .values()
            .filter(|g| g.phone.as_deref().map(normalize_phone).as_deref() == Some(wanted.as_str()))
            .collect();
        matches.sort_by_key(|g| g.id);
        Ok(matches.first().map(|g| (*g).clone()))
    }
}

#[async_trait]
impl Inbox for MemoryStore {
    async fn deliver(&self, recipient_id: u64, student_id: u64, content: &str) -> Result<()> {
        self.tables.lock().await.inbox.push(InboxMessage {
            recipient_id,
            student_id,
            content: content.to_string(),
        });
        Ok(())
    }
}
