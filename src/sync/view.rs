use std::collections::HashMap;

use chrono::NaiveDate;

use crate::fanout::{Published, PushEvent};
use crate::ledger::DaySnapshot;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus};
use crate::model::check_in::CheckInRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub status: AttendanceStatus,
    /// Set by a local write the server has not echoed back yet.
    pub tentative: bool,
}

/// A dashboard's picture of one day.
///
/// Local writes show up immediately as tentative cells; the next pushed
/// event or snapshot for the same key replaces them with the ledger's value.
#[derive(Debug, Clone)]
pub struct DashboardView {
    date: NaiveDate,
    students: HashMap<u64, Cell>,
    staff: HashMap<u64, Cell>,
    last_seq: Option<u64>,
}

impl DashboardView {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            students: HashMap::new(),
            staff: HashMap::new(),
            last_seq: None,
        }
    }

    pub fn from_snapshot(snapshot: &DaySnapshot) -> Self {
        let mut view = Self::new(snapshot.date);
        view.load_snapshot(snapshot);
        view
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Replaces everything with the ledger's state. Used on connect and after
    /// a `resync`.
    pub fn load_snapshot(&mut self, snapshot: &DaySnapshot) {
        self.date = snapshot.date;
        self.students = snapshot
            .attendance
            .iter()
            .map(|r| (r.student_id, authoritative(r.status)))
            .collect();
        self.staff = snapshot
            .check_ins
            .iter()
            .map(|r| (r.user_id, authoritative(r.status)))
            .collect();
        self.last_seq = None;
    }

    pub fn mark_tentative(&mut self, student_id: u64, status: AttendanceStatus) {
        self.students.insert(
            student_id,
            Cell {
                status,
                tentative: true,
            },
        );
    }

    /// Staff cells keep the ledger's value once known: check-ins never change.
    pub fn check_in_tentative(&mut self, user_id: u64, status: AttendanceStatus) {
        self.staff.entry(user_id).or_insert(Cell {
            status,
            tentative: true,
        });
    }

    /// Settles a tentative mark from the write's own Ack. A repeated status
    /// publishes nothing, so without this the cell would stay tentative
    /// until the next snapshot. A cell a push already settled is left alone,
    /// since the push may carry a later write.
    pub fn confirm_mark(&mut self, record: &AttendanceRecord) {
        if record.date != self.date {
            return;
        }
        if let Some(cell) = self.students.get_mut(&record.student_id) {
            if cell.tentative {
                *cell = authoritative(record.status);
            }
        }
    }

    /// Same as `confirm_mark` for a check-in Ack.
    pub fn confirm_check_in(&mut self, record: &CheckInRecord) {
        if record.date != self.date {
            return;
        }
        if let Some(cell) = self.staff.get_mut(&record.user_id) {
            if cell.tentative {
                *cell = authoritative(record.status);
            }
        }
    }

    /// Applies one pushed event. Returns false when it was ignored: an
    /// already-seen sequence number or another day.
    pub fn apply_event(&mut self, published: &Published) -> bool {
        if self.last_seq.is_some_and(|seen| published.seq <= seen) {
            return false;
        }
        self.last_seq = Some(published.seq);

        match &published.event {
            PushEvent::AttendanceUpdate {
                student_id,
                status,
                date,
            } => {
                if *date != self.date {
                    return false;
                }
                self.students.insert(*student_id, authoritative(*status));
            }
            PushEvent::StaffUpdate {
                user_id,
                status,
                date,
            } => {
                if *date != self.date {
                    return false;
                }
                self.staff.insert(*user_id, authoritative(*status));
            }
            PushEvent::StudentDeleted { student_id } => {
                self.students.remove(student_id);
            }
        }
        true
    }

    pub fn student(&self, student_id: u64) -> Option<Cell> {
        self.students.get(&student_id).copied()
    }

    pub fn staff(&self, user_id: u64) -> Option<Cell> {
        self.staff.get(&user_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.students
            .values()
            .chain(self.staff.values())
            .filter(|c| c.tentative)
            .count()
    }

    /// Students per status, ignoring tentative cells.
    pub fn confirmed_totals(&self) -> HashMap<AttendanceStatus, usize> {
        let mut totals = HashMap::new();
        for cell in self.students.values().filter(|c| !c.tentative) {
            *totals.entry(cell.status).or_insert(0) += 1;
        }
        totals
    }
}

fn authoritative(status: AttendanceStatus) -> Cell {
    Cell {
        status,
        tentative: false,
    }
}
