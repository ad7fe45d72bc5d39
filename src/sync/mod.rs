//! Device-side half of attendance capture: a durable queue of writes made
//! while offline, the rules for replaying them, and a dashboard view that
//! folds pushed events over the last snapshot.

pub mod connectivity;
pub mod queue;
pub mod replay;
pub mod submit;
pub mod view;

use thiserror::Error;

pub use connectivity::{Backoff, ConnectivityMonitor, HttpProbe, Probe};
pub use queue::{DrainReport, QueuedEvent, QueuedPayload, ReconciliationQueue, TerminalFailure};
pub use replay::Replayer;
pub use submit::{HttpSubmitter, SubmitOutcome, Submitter, classify};
pub use view::DashboardView;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Queue file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
