use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    MySql { database_url: String },
    /// Process-local tables; nothing survives a restart.
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,
    pub log_level: String,
    pub run_migrations: bool,
    pub db_acquire_timeout_secs: u64,

    // Rate limiting
    pub rate_write_per_min: u32,
    pub rate_read_per_min: u32,

    // Check-in rules
    pub default_geofence_radius_m: f64,
    pub late_after: NaiveTime,

    // Fan-out
    pub fanout_capacity: usize,

    // Notifications
    pub mail_api_url: Option<String>,
    pub mail_api_token: Option<String>,
    pub mail_from: String,
    pub placeholder_email_domains: Vec<String>,
    pub guardian_cache_ttl_secs: u64,
}

fn var_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", key, raw, e))
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let storage = match env::var("STORAGE").unwrap_or_else(|_| "mysql".to_string()).as_str() {
            "memory" => StorageBackend::Memory,
            "mysql" => StorageBackend::MySql {
                database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            },
            other => bail!("STORAGE must be mysql or memory, got {:?}", other),
        };

        let late_after_raw = env::var("LATE_AFTER").unwrap_or_else(|_| "09:00".to_string());
        let late_after = NaiveTime::parse_from_str(late_after_raw.trim(), "%H:%M")
            .with_context(|| format!("LATE_AFTER must be HH:MM, got {:?}", late_after_raw))?;

        Ok(Self {
            storage,
            server_addr: env::var("SERVER_ADDR").context("SERVER_ADDR must be set")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            run_migrations: var_or("RUN_MIGRATIONS", "true")?,
            db_acquire_timeout_secs: var_or("DB_ACQUIRE_TIMEOUT_SECS", "3")?,

            rate_write_per_min: var_or("RATE_WRITE_PER_MIN", "600")?,
            rate_read_per_min: var_or("RATE_READ_PER_MIN", "1000")?,

            default_geofence_radius_m: var_or("DEFAULT_GEOFENCE_RADIUS_M", "150")?,
            late_after,

            fanout_capacity: var_or("FANOUT_CAPACITY", "256")?,

            mail_api_url: optional_var("MAIL_API_URL"),
            mail_api_token: optional_var("MAIL_API_TOKEN"),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "attendance@school.example".to_string()),
            placeholder_email_domains: env::var("PLACEHOLDER_EMAIL_DOMAINS")
                .unwrap_or_else(|_| "placeholder.local,noemail.invalid".to_string())
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            guardian_cache_ttl_secs: var_or("GUARDIAN_CACHE_TTL_SECS", "300")?,
        })
    }

    /// Settings for tests and local runs against the in-memory store.
    pub fn for_memory(jwt_secret: &str) -> Self {
        Self {
            storage: StorageBackend::Memory,
            jwt_secret: jwt_secret.to_string(),
            server_addr: "127.0.0.1:8080".to_string(),
            api_prefix: "/api".to_string(),
            log_level: "info".to_string(),
            run_migrations: false,
            db_acquire_timeout_secs: 3,
            rate_write_per_min: 600,
            rate_read_per_min: 1000,
            default_geofence_radius_m: 150.0,
            late_after: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            fanout_capacity: 256,
            mail_api_url: None,
            mail_api_token: None,
            mail_from: "attendance@school.example".to_string(),
            placeholder_email_domains: vec!["placeholder.local".to_string()],
            guardian_cache_ttl_secs: 300,
        }
    }
}
