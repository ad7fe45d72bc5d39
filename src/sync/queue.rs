use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::SyncError;
use super::submit::{SubmitOutcome, Submitter};
use crate::models::{CheckInReq, MarkAttendanceReq};

/// A write captured on the device, in the shape the server accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request", rename_all = "snake_case")]
pub enum QueuedPayload {
    CheckIn(CheckInReq),
    Mark(MarkAttendanceReq),
}

impl QueuedPayload {
    pub fn describe(&self) -> String {
        match self {
            QueuedPayload::CheckIn(req) => match req.user_id {
                Some(user_id) => format!("check-in for user {}", user_id),
                None => "own check-in".to_string(),
            },
            QueuedPayload::Mark(req) => {
                format!("{} mark for student {}", req.status, req.student_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Identifies the event across handles that re-read the file.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub payload: QueuedPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
}

/// An event the server refused for good. Removed from the queue and handed
/// to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalFailure {
    pub event: QueuedEvent,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainReport {
    pub confirmed: usize,
    pub terminal: Vec<TerminalFailure>,
    /// Set when a transient failure stopped the drain early.
    pub stopped_on: Option<String>,
    pub remaining: usize,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.stopped_on.is_none()
    }
}

/// Ordered, file-backed buffer of writes waiting for the server.
///
/// The file holds a JSON array, oldest first, and is the only source of
/// truth: several handles (a `watch` loop and one-off `enqueue` runs) may
/// share it. Every mutation takes an exclusive lock on a sibling `.lock`
/// file, re-reads the list, applies the change and rewrites it through a
/// temp file and a rename. A crash leaves either the old or the new list.
#[derive(Debug)]
pub struct ReconciliationQueue {
    path: PathBuf,
    events: Vec<QueuedEvent>,
}

/// Released on drop.
struct QueueLock(File);

impl Drop for QueueLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

impl ReconciliationQueue {
    /// Loads the queue at `path`; a missing file is an empty queue.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let mut queue = Self {
            path: path.into(),
            events: Vec::new(),
        };
        queue.refresh()?;
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events as of the last read or write through this handle.
    pub fn events(&self) -> &[QueuedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Re-reads the file, picking up events other handles appended.
    pub fn refresh(&mut self) -> Result<(), SyncError> {
        let _lock = self.lock()?;
        self.reload()
    }

    pub fn enqueue(&mut self, payload: QueuedPayload) -> Result<(), SyncError> {
        let _lock = self.lock()?;
        self.reload()?;
        self.events.push(QueuedEvent {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        });
        if let Err(e) = self.persist() {
            self.events.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Replays queued events oldest first, one at a time.
    ///
    /// The lock is not held while a submission is in flight, so enqueues
    /// from other processes are never blocked on the network. Confirmed and
    /// terminal events are removed and the file rewritten before the next
    /// submission. A retryable failure bumps the head's attempt count and
    /// ends the drain, so nothing overtakes it.
    pub async fn drain<S>(&mut self, submitter: &S) -> Result<DrainReport, SyncError>
    where
        S: Submitter + ?Sized,
    {
        let mut report = DrainReport::default();

        loop {
            let head = {
                let _lock = self.lock()?;
                self.reload()?;
                match self.events.first() {
                    Some(head) => head.clone(),
                    None => break,
                }
            };
            let description = head.payload.describe();
            let outcome = submitter.submit(&head.payload).await;

            let _lock = self.lock()?;
            self.reload()?;
            let position = self.events.iter().position(|e| e.id == head.id);

            match outcome {
                SubmitOutcome::Confirmed => {
                    if let Some(i) = position {
                        self.events.remove(i);
                        self.persist()?;
                    }
                    report.confirmed += 1;
                    info!(event = %description, "Queued write confirmed");
                }
                SubmitOutcome::Terminal(reason) => {
                    if let Some(i) = position {
                        self.events.remove(i);
                        self.persist()?;
                    }
                    warn!(event = %description, reason = %reason, "Queued write refused");
                    report.terminal.push(TerminalFailure {
                        event: head,
                        reason,
                    });
                }
                SubmitOutcome::Retryable(reason) => {
                    if let Some(i) = position {
                        self.events[i].attempt_count += 1;
                        self.persist()?;
                    }
                    warn!(event = %description, reason = %reason, "Server unreachable; keeping queue");
                    report.stopped_on = Some(reason);
                    break;
                }
            }
        }

        report.remaining = self.events.len();
        Ok(report)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn ensure_dir(&self) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    // a sibling file, since rename swaps out the queue file's inode
    fn lock(&self) -> Result<QueueLock, SyncError> {
        self.ensure_dir()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.sibling(".lock"))?;
        file.lock_exclusive()?;
        Ok(QueueLock(file))
    }

    /// Caller holds the lock.
    fn reload(&mut self) -> Result<(), SyncError> {
        self.events = match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }

    /// Caller holds the lock.
    fn persist(&self) -> Result<(), SyncError> {
        self.ensure_dir()?;
        let tmp = self.sibling(".tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.events)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
