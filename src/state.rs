use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::fanout::Broadcaster;
use crate::ledger::store::{Directory, Inbox, LedgerStore};
use crate::ledger::{CheckInPolicy, Ledger};
use crate::notify::NotificationPipeline;
use crate::notify::mailer::{HttpMailer, Mailer};

/// Shared by every worker. Owns the ledger and, through it, the broadcaster
/// and notification pipeline.
pub struct AppState {
    pub ledger: Ledger,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, config: &Config) -> Result<Self>
    where
        S: LedgerStore + Directory + Inbox + 'static,
    {
        let mailer: Option<Arc<dyn Mailer>> = match &config.mail_api_url {
            Some(url) => Some(Arc::new(HttpMailer::new(
                url.clone(),
                config.mail_api_token.clone(),
                config.mail_from.clone(),
            )?)),
            None => None,
        };

        Ok(Self::with_mailer(store, config, mailer))
    }

    pub fn with_mailer<S>(store: Arc<S>, config: &Config, mailer: Option<Arc<dyn Mailer>>) -> Self
    where
        S: LedgerStore + Directory + Inbox + 'static,
    {
        let notifier = Arc::new(NotificationPipeline::new(
            store.clone(),
            store.clone(),
            mailer,
            config.placeholder_email_domains.clone(),
            Duration::from_secs(config.guardian_cache_ttl_secs),
        ));

        let ledger = Ledger::new(
            store.clone(),
            store,
            Broadcaster::new(config.fanout_capacity),
            notifier,
            CheckInPolicy {
                default_radius_meters: config.default_geofence_radius_m,
                late_after: config.late_after,
            },
        );

        Self { ledger }
    }
}
