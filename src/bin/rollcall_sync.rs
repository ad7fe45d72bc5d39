//! Device client: queues attendance writes while offline and replays them
//! once the server is reachable again.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use rollcall::model::attendance::AttendanceStatus;
use rollcall::models::{CheckInReq, MarkAttendanceReq};
use rollcall::sync::{
    Backoff, ConnectivityMonitor, DrainReport, HttpProbe, HttpSubmitter, QueuedPayload,
    ReconciliationQueue, Replayer,
};

#[derive(Parser, Debug)]
#[command(name = "rollcall-sync")]
#[command(about = "Offline queue and replay for attendance devices")]
#[command(version)]
struct Args {
    /// Local queue file
    #[arg(long, default_value = "rollcall-queue.json", env = "ROLLCALL_QUEUE")]
    queue: PathBuf,

    /// Server root, without the API prefix
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "ROLLCALL_SERVER")]
    server: String,

    #[arg(long, default_value = "/api", env = "API_PREFIX")]
    api_prefix: String,

    /// Bearer token used when replaying
    #[arg(long, env = "ROLLCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "5", env = "ROLLCALL_TIMEOUT_SECS")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a staff check-in taken now
    EnqueueCheckIn {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Admins only: check in someone else
        #[arg(long)]
        user_id: Option<u64>,
        #[arg(long)]
        photo_ref: Option<String>,
    },
    /// Queue a student attendance mark for today (or --date)
    EnqueueMark {
        #[arg(long)]
        student_id: u64,
        /// Present, Absent or Late
        #[arg(long)]
        status: AttendanceStatus,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Replay the queue now
    Drain,
    /// List queued events
    Status,
    /// Follow connectivity and drain on every reconnect
    Watch {
        /// Seconds between probes while online
        #[arg(long, default_value = "30")]
        poll_secs: u64,
        /// Longest wait between probes while offline
        #[arg(long, default_value = "60")]
        max_backoff_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut queue = ReconciliationQueue::open(&args.queue)
        .with_context(|| format!("opening queue {}", args.queue.display()))?;

    match &args.command {
        Command::EnqueueCheckIn {
            lat,
            lng,
            user_id,
            photo_ref,
        } => {
            let now = Local::now();
            // captured now so a late replay still records when the person arrived
            let payload = QueuedPayload::CheckIn(CheckInReq {
                user_id: *user_id,
                date: Some(now.date_naive()),
                check_in_time: Some(now.time()),
                location: Some(json!({ "lat": lat, "lng": lng })),
                photo_ref: photo_ref.clone(),
            });
            enqueue(&mut queue, payload)?;
        }
        Command::EnqueueMark {
            student_id,
            status,
            date,
        } => {
            let payload = QueuedPayload::Mark(MarkAttendanceReq {
                student_id: *student_id,
                status: *status,
                date: Some(date.unwrap_or_else(|| Local::now().date_naive())),
            });
            enqueue(&mut queue, payload)?;
        }
        Command::Status => print_status(&queue),
        Command::Drain => {
            let submitter = submitter(&args)?;
            let report = queue.drain(&submitter).await?;
            print_report(&report);
        }
        Command::Watch {
            poll_secs,
            max_backoff_secs,
        } => {
            let submitter = submitter(&args)?;
            let probe = HttpProbe::new(&args.server, Duration::from_secs(args.timeout_secs))?;
            let monitor = ConnectivityMonitor::new(
                probe,
                Duration::from_secs(*poll_secs),
                Backoff::new(Duration::from_secs(1), Duration::from_secs(*max_backoff_secs)),
            );
            let mut online = monitor.subscribe();
            tokio::spawn(monitor.run());

            info!(queued = queue.len(), "Watching connectivity");
            let poll = Duration::from_secs(*poll_secs);
            let mut replayer = Replayer::new(
                queue,
                submitter,
                poll,
                Backoff::new(Duration::from_secs(2), Duration::from_secs(*max_backoff_secs)),
            );
            let mut delay = poll;
            loop {
                tokio::select! {
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        // going offline only matters for the next tick
                        if !*online.borrow_and_update() {
                            continue;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                    _ = tokio::signal::ctrl_c() => break,
                }

                let is_online = *online.borrow();
                delay = match replayer.tick(is_online).await {
                    Ok((report, next)) => {
                        if let Some(report) = report {
                            print_report(&report);
                        }
                        next
                    }
                    Err(e) => {
                        error!(error = %e, "Drain failed");
                        poll
                    }
                };
            }
        }
    }

    Ok(())
}

fn enqueue(queue: &mut ReconciliationQueue, payload: QueuedPayload) -> Result<()> {
    let description = payload.describe();
    queue.enqueue(payload)?;
    println!("Saved locally, will sync: {} ({} queued)", description, queue.len());
    Ok(())
}

fn submitter(args: &Args) -> Result<HttpSubmitter> {
    let Some(token) = args.token.clone() else {
        bail!("--token (or ROLLCALL_TOKEN) is required to replay the queue");
    };
    let base_url = format!(
        "{}/{}",
        args.server.trim_end_matches('/'),
        args.api_prefix.trim_matches('/')
    );
    Ok(HttpSubmitter::new(
        &base_url,
        token,
        Duration::from_secs(args.timeout_secs),
    )?)
}

fn print_status(queue: &ReconciliationQueue) {
    if queue.is_empty() {
        println!("Queue is empty");
        return;
    }
    println!("{} queued event(s), oldest first:", queue.len());
    for (i, event) in queue.events().iter().enumerate() {
        println!(
            "  {:>3}. {}  queued {}  attempts {}",
            i + 1,
            event.payload.describe(),
            event.enqueued_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            event.attempt_count
        );
    }
}

fn print_report(report: &DrainReport) {
    println!("Synced {} event(s)", report.confirmed);
    for failure in &report.terminal {
        println!(
            "  Dropped {}: {}",
            failure.event.payload.describe(),
            failure.reason
        );
    }
    if let Some(reason) = &report.stopped_on {
        println!(
            "  Stopped ({}); {} event(s) saved locally, will sync",
            reason, report.remaining
        );
    }
}

