use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: u64,
    pub name: String,
    pub class_id: u64,
    /// Explicit guardian link, when the school recorded one.
    pub parent_id: Option<u64>,
    /// Guardian phone captured at enrolment; used when no link exists.
    pub parent_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardian {
    pub id: u64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Digits only, so "+880 1712-345678" and "8801712345678" match.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}
