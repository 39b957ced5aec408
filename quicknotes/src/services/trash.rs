//! Trash retention
//!
//! Notes left in the trash past the retention period are purged through
//! the normal purge path. A single important warning is recorded for each
//! note shortly before that happens.

use crate::config::TRASH_PURGE_WARNING_HOURS;
use crate::database::{NotificationType, Repository};
use crate::error::Result;
use crate::services::{NotesService, NotificationsService};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub warned: usize,
    pub purged: usize,
}

#[derive(Clone)]
pub struct TrashSweeper {
    repo: Repository,
    notes: NotesService,
    notifications: NotificationsService,
    retention: ChronoDuration,
    warning: ChronoDuration,
}

impl TrashSweeper {
    pub fn new(
        repo: Repository,
        notes: NotesService,
        notifications: NotificationsService,
        retention_days: i64,
    ) -> Self {
        Self {
            repo,
            notes,
            notifications,
            retention: ChronoDuration::days(retention_days),
            warning: ChronoDuration::hours(TRASH_PURGE_WARNING_HOURS),
        }
    }

    /// Warn about notes nearing expiry and purge the expired ones
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let expired_before = now - self.retention;
        for note in self.repo.list_trashed_before(expired_before).await? {
            self.notes.purge_note(note.id).await?;
            report.purged += 1;
        }

        let warn_before = expired_before + self.warning;
        for note in self.repo.list_trashed_before(warn_before).await? {
            if self
                .notifications
                .has_of_type(note.id, &NotificationType::NoteDeletedSoon)
                .await?
            {
                continue;
            }

            self.notifications
                .record(Some(note.id), NotificationType::NoteDeletedSoon, true)
                .await;
            report.warned += 1;
        }

        if report.purged > 0 || report.warned > 0 {
            tracing::info!(
                purged = report.purged,
                warned = report.warned,
                "Trash retention sweep finished"
            );
        } else {
            tracing::debug!("Trash retention sweep: nothing to do");
        }

        Ok(report)
    }
}

/// Sweep once per `interval` until `cancel`
pub fn spawn_trash_sweeper(
    sweeper: TrashSweeper,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            retention_days = sweeper.retention.num_days(),
            interval_secs = interval.as_secs(),
            "Trash retention job started"
        );

        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Trash retention job stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = sweeper.sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Trash retention sweep failed");
                    }
                }
            }
        }
    })
}
