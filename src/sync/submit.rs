use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::SyncError;
use super::queue::QueuedPayload;

/// How one submission of a queued event ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// On the ledger, either now or from an earlier attempt.
    Confirmed,
    /// Worth trying again later.
    Retryable(String),
    /// Refused for good.
    Terminal(String),
}

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, payload: &QueuedPayload) -> SubmitOutcome;
}

/// Sorts a server response into exactly one outcome.
///
/// A `DUPLICATE` rejection counts as confirmed: the record the device wanted
/// is already there. Only rejections the server will repeat on every replay
/// are terminal; authentication failures wait for a fresh token.
pub fn classify(status: u16, body: &str) -> SubmitOutcome {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| {
        json.as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    match status {
        200..=299 => match (field("status").as_deref(), field("reason")) {
            (Some("Rejected"), Some(reason)) if reason == "DUPLICATE" => SubmitOutcome::Confirmed,
            (Some("Rejected"), reason) => {
                SubmitOutcome::Terminal(reason.unwrap_or_else(|| "REJECTED".to_string()))
            }
            _ => SubmitOutcome::Confirmed,
        },
        // an expired token is fixed by signing in again, not by dropping the write
        401 => SubmitOutcome::Retryable(match field("error") {
            Some(error) => format!("HTTP 401: {}", error),
            None => "HTTP 401".to_string(),
        }),
        408 | 429 => SubmitOutcome::Retryable(format!("HTTP {}", status)),
        500..=599 => SubmitOutcome::Retryable(format!("HTTP {}", status)),
        400..=499 => match field("reason") {
            Some(reason) if reason == "DUPLICATE" => SubmitOutcome::Confirmed,
            Some(reason) => SubmitOutcome::Terminal(match field("message") {
                Some(message) => format!("{}: {}", reason, message),
                None => reason,
            }),
            None => SubmitOutcome::Terminal(match field("error") {
                Some(error) => format!("HTTP {}: {}", status, error),
                None => format!("HTTP {}", status),
            }),
        },
        other => SubmitOutcome::Retryable(format!("unexpected HTTP {}", other)),
    }
}

/// Replays queued events against the attendance API.
pub struct HttpSubmitter {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSubmitter {
    /// `base_url` includes the API prefix, e.g. `https://school.example/api`.
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, payload: &QueuedPayload) -> SubmitOutcome {
        let request = match payload {
            QueuedPayload::CheckIn(req) => self
                .client
                .post(format!("{}/attendance/check-in", self.base_url))
                .json(req),
            QueuedPayload::Mark(req) => self
                .client
                .post(format!("{}/attendance/mark", self.base_url))
                .json(req),
        };

        let response = match request.bearer_auth(&self.token).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return SubmitOutcome::Retryable("timed out".to_string()),
            Err(e) => return SubmitOutcome::Retryable(format!("network error: {}", e)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify(status, &body),
            // the server answered but the body was cut off; only a 2xx is known to be committed
            Err(_) if (200..300).contains(&status) => SubmitOutcome::Confirmed,
            Err(e) => SubmitOutcome::Retryable(format!("reading response: {}", e)),
        }
    }
}
