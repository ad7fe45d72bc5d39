use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use super::SyncError;

/// Exponential delay between reconnect attempts, doubling up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachability via the server's `/health` endpoint.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/health", server_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Publishes the device's online state on a watch channel.
///
/// While online the server is polled at a fixed interval; while offline the
/// gap between probes follows the backoff and resets on reconnect.
pub struct ConnectivityMonitor<P> {
    probe: P,
    poll_interval: Duration,
    backoff: Backoff,
    tx: watch::Sender<bool>,
}

impl<P: Probe> ConnectivityMonitor<P> {
    pub fn new(probe: P, poll_interval: Duration, backoff: Backoff) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            probe,
            poll_interval,
            backoff,
            tx,
        }
    }

    /// Receivers see `true` on every offline -> online transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// One probe. Returns the delay before the next one.
    pub async fn tick(&mut self) -> Duration {
        let online = self.probe.is_reachable().await;
        let was_online = *self.tx.borrow();

        if online != was_online {
            info!(online, "Connectivity changed");
            self.tx.send_replace(online);
        }

        if online {
            self.backoff.reset();
            self.poll_interval
        } else {
            self.backoff.next_delay()
        }
    }

    /// Probes until every receiver is gone.
    pub async fn run(mut self) {
        while !self.tx.is_closed() {
            let delay = self.tick().await;
            tokio::time::sleep(delay).await;
        }
    }
}
