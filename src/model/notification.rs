use serde::Serialize;
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
    InApp,
    Email,
}

/// Derived from a ledger change; only the in-app copy is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub student_id: u64,
    pub parent_id: u64,
    pub content: String,
    pub channel: Channel,
}
