use std::time::Duration;

use tracing::debug;

use super::SyncError;
use super::connectivity::Backoff;
use super::queue::{DrainReport, ReconciliationQueue};
use super::submit::Submitter;

/// Decides when the queue is replayed while a device stays up.
///
/// Every tick while online drains whatever is queued, including events
/// other processes appended since the last look. A drain that stopped on a
/// retryable failure is retried on the backoff; a clean one resets it and
/// waits for the regular poll.
pub struct Replayer<S> {
    queue: ReconciliationQueue,
    submitter: S,
    poll_interval: Duration,
    retry: Backoff,
}

impl<S: Submitter> Replayer<S> {
    pub fn new(
        queue: ReconciliationQueue,
        submitter: S,
        poll_interval: Duration,
        retry: Backoff,
    ) -> Self {
        Self {
            queue,
            submitter,
            poll_interval,
            retry,
        }
    }

    pub fn queue(&self) -> &ReconciliationQueue {
        &self.queue
    }

    /// One scheduling step. Returns the drain report, if a drain ran, and
    /// the delay before the next tick.
    pub async fn tick(
        &mut self,
        online: bool,
    ) -> Result<(Option<DrainReport>, Duration), SyncError> {
        if !online {
            return Ok((None, self.poll_interval));
        }

        self.queue.refresh()?;
        if self.queue.is_empty() {
            self.retry.reset();
            return Ok((None, self.poll_interval));
        }

        let report = self.queue.drain(&self.submitter).await?;
        let delay = if report.is_complete() {
            self.retry.reset();
            self.poll_interval
        } else {
            let delay = self.retry.next_delay();
            debug!(?delay, remaining = report.remaining, "Drain stopped; retrying later");
            delay
        };
        Ok((Some(report), delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::AttendanceStatus;
    use crate::models::MarkAttendanceReq;
    use crate::sync::queue::QueuedPayload;
    use crate::sync::submit::SubmitOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Script(Mutex<Vec<SubmitOutcome>>);

    #[async_trait]
    impl Submitter for Script {
        async fn submit(&self, _: &QueuedPayload) -> SubmitOutcome {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                SubmitOutcome::Confirmed
            } else {
                script.remove(0)
            }
        }
    }

    fn mark(student_id: u64) -> QueuedPayload {
        QueuedPayload::Mark(MarkAttendanceReq {
            student_id,
            status: AttendanceStatus::Late,
            date: None,
        })
    }

    #[tokio::test]
    async fn server_errors_are_retried_on_backoff_while_link_stays_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = ReconciliationQueue::open(&path).unwrap();
        queue.enqueue(mark(1)).unwrap();

        let script = Script(Mutex::new(vec![
            SubmitOutcome::Retryable("HTTP 503".into()),
            SubmitOutcome::Retryable("HTTP 503".into()),
        ]));
        let mut replayer = Replayer::new(
            queue,
            script,
            Duration::from_secs(30),
            Backoff::new(Duration::from_secs(2), Duration::from_secs(60)),
        );

        let (report, delay) = replayer.tick(true).await.unwrap();
        assert_eq!(report.unwrap().remaining, 1);
        assert_eq!(delay, Duration::from_secs(2));

        let (_, delay) = replayer.tick(true).await.unwrap();
        assert_eq!(delay, Duration::from_secs(4));

        // still online, server recovered
        let (report, delay) = replayer.tick(true).await.unwrap();
        assert_eq!(report.unwrap().confirmed, 1);
        assert_eq!(delay, Duration::from_secs(30));
        assert!(replayer.queue().is_empty());
    }

    #[tokio::test]
    async fn online_tick_picks_up_events_queued_by_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut replayer = Replayer::new(
            ReconciliationQueue::open(&path).unwrap(),
            Script(Mutex::new(vec![])),
            Duration::from_secs(30),
            Backoff::default(),
        );

        let (report, _) = replayer.tick(true).await.unwrap();
        assert!(report.is_none());

        ReconciliationQueue::open(&path).unwrap().enqueue(mark(7)).unwrap();

        let (report, _) = replayer.tick(false).await.unwrap();
        assert!(report.is_none());
        let (report, _) = replayer.tick(true).await.unwrap();
        assert_eq!(report.unwrap().confirmed, 1);
        assert!(ReconciliationQueue::open(&path).unwrap().is_empty());
    }
}
