//! Guardian notifications derived from student attendance changes.
//!
//! Runs off the write path: `dispatch` spawns the work and returns at once,
//! and every failure inside ends in a log line.

pub mod mailer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use moka::future::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ledger::store::{Directory, Inbox};
use crate::model::attendance::AttendanceRecord;
use crate::model::notification::{Channel, NotificationEvent};
use crate::model::student::{Guardian, Student};
use mailer::{Mailer, OutgoingEmail, is_usable_email};

/// Counts of what actually went out for one ledger change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub in_app: usize,
    pub emails: usize,
}

pub struct NotificationPipeline {
    directory: Arc<dyn Directory>,
    inbox: Arc<dyn Inbox>,
    mailer: Option<Arc<dyn Mailer>>,
    placeholder_domains: Vec<String>,
    /// student id -> resolved guardian
    guardians: Cache<u64, Guardian>,
}

impl NotificationPipeline {
    pub fn new(
        directory: Arc<dyn Directory>,
        inbox: Arc<dyn Inbox>,
        mailer: Option<Arc<dyn Mailer>>,
        placeholder_domains: Vec<String>,
        guardian_ttl: Duration,
    ) -> Self {
        if mailer.is_none() {
            info!("No mail transport configured; guardian emails will only be logged");
        }
        Self {
            directory,
            inbox,
            mailer,
            placeholder_domains,
            guardians: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(guardian_ttl)
                .build(),
        }
    }

    /// Fire-and-forget. The caller must not await the handle on a write path.
    pub fn dispatch(self: &Arc<Self>, record: AttendanceRecord) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.on_ledger_change(&record).await {
                Ok(report) => debug!(
                    student_id = record.student_id,
                    in_app = report.in_app,
                    emails = report.emails,
                    "Notifications dispatched"
                ),
                Err(e) => warn!(
                    error = %e,
                    student_id = record.student_id,
                    "Notification pipeline failed"
                ),
            }
        })
    }

    pub async fn on_ledger_change(&self, record: &AttendanceRecord) -> Result<DispatchReport> {
        let student = self
            .directory
            .student(record.student_id)
            .await?
            .ok_or_else(|| anyhow!("student {} not found", record.student_id))?;

        let guardian = self
            .resolve_guardian(&student)
            .await?
            .ok_or_else(|| anyhow!("no guardian linked to student {}", student.id))?;

        let mut report = DispatchReport::default();
        for event in derive_events(&student, &guardian, record, &self.placeholder_domains) {
            match event.channel {
                Channel::InApp => {
                    match self
                        .inbox
                        .deliver(event.parent_id, event.student_id, &event.content)
                        .await
                    {
                        Ok(()) => report.in_app += 1,
                        Err(e) => warn!(error = %e, parent_id = event.parent_id, "In-app message failed"),
                    }
                }
                Channel::Email => {
                    // derive_events only emits Email when the address is usable
                    let Some(to) = guardian.email.clone() else {
                        continue;
                    };
                    let email = OutgoingEmail {
                        to: to.trim().to_string(),
                        subject: email_subject(&student, record),
                        body: event.content,
                    };
                    if self.send_email(&email).await {
                        report.emails += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Explicit link first, then a match on the phone captured at enrolment.
    async fn resolve_guardian(&self, student: &Student) -> Result<Option<Guardian>> {
        if let Some(cached) = self.guardians.get(&student.id).await {
            return Ok(Some(cached));
        }

        let mut guardian = match student.parent_id {
            Some(parent_id) => self.directory.guardian_by_id(parent_id).await?,
            None => None,
        };
        if guardian.is_none() {
            if let Some(phone) = student.parent_phone.as_deref() {
                guardian = self.directory.guardian_by_phone(phone).await?;
            }
        }

        if let Some(found) = &guardian {
            self.guardians.insert(student.id, found.clone()).await;
        }
        Ok(guardian)
    }

    /// At most one retry. Returns whether the message went out.
    async fn send_email(&self, email: &OutgoingEmail) -> bool {
        let Some(mailer) = &self.mailer else {
            info!(to = %email.to, subject = %email.subject, "Email transport not configured; skipping send");
            return false;
        };

        for attempt in 1..=2 {
            match mailer.send(email).await {
                Ok(()) => return true,
                Err(e) => warn!(error = %e, attempt, to = %email.to, "Guardian email failed"),
            }
        }
        false
    }
}

pub fn email_subject(student: &Student, record: &AttendanceRecord) -> String {
    format!("Attendance alert: {} marked {}", student.name, record.status)
}

/// In-app message always; email only for Absent/Late with a real address.
pub fn derive_events(
    student: &Student,
    guardian: &Guardian,
    record: &AttendanceRecord,
    placeholder_domains: &[String],
) -> Vec<NotificationEvent> {
    let content = format!(
        "{} was marked {} on {}.",
        student.name,
        record.status,
        record.date.format("%d %b %Y")
    );

    let mut events = vec![NotificationEvent {
        student_id: student.id,
        parent_id: guardian.id,
        content: content.clone(),
        channel: Channel::InApp,
    }];

    let has_real_email = guardian
        .email
        .as_deref()
        .is_some_and(|addr| is_usable_email(addr, placeholder_domains));

    if record.status.is_alerting() && has_real_email {
        events.push(NotificationEvent {
            student_id: student.id,
            parent_id: guardian.id,
            content: format!(
                "Dear {},\n\n{}\nPlease contact the school if this is unexpected.\n",
                guardian.name, content
            ),
            channel: Channel::Email,
        });
    }

    events
}
