//! Message retention sweep.
//!
//! Runs daily: messages older than the retention window are soft-deleted
//! (archived, excluded from history pages but still in the database), and
//! optionally hard-deleted once they have been archived long enough. Hard
//! deletion is off by default.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use crate::store::ChatStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchivalReport {
    pub archived: u64,
    pub purged: u64,
}

#[derive(Clone)]
pub struct ArchivalJob {
    store: Arc<dyn ChatStore>,
    retention_days: u32,
    hard_delete_days: u32,
}

impl ArchivalJob {
    pub fn new(store: Arc<dyn ChatStore>, retention_days: u32, hard_delete_days: u32) -> Self {
        Self {
            store,
            retention_days,
            hard_delete_days,
        }
    }

    /// One sweep. The archive and purge steps are independent; a failure in
    /// one is logged and does not abort the other.
    pub async fn run_once(&self) -> ArchivalReport {
        let now = Utc::now();
        let mut report = ArchivalReport::default();

        let archive_cutoff = now - ChronoDuration::days(i64::from(self.retention_days));
        match self.store.archive_messages_before(archive_cutoff, now).await {
            Ok(archived) => report.archived = archived,
            Err(err) => tracing::error!("archival sweep failed: {err}"),
        }

        if self.hard_delete_days > 0 {
            let purge_cutoff = now - ChronoDuration::days(i64::from(self.hard_delete_days));
            match self.store.purge_archived_before(purge_cutoff).await {
                Ok(purged) => report.purged = purged,
                Err(err) => tracing::error!("purge sweep failed: {err}"),
            }
        }

        if report.archived > 0 || report.purged > 0 {
            tracing::info!(
                archived = report.archived,
                purged = report.purged,
                "retention sweep complete"
            );
        }
        report
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
