//! Notification ledger service
//!
//! Append-only record of note lifecycle events. Recording on behalf of a
//! lifecycle operation never fails that operation: the mutation it
//! documents has already happened.

use crate::database::{NoteNotification, NotificationType, Repository};
use crate::error::Result;

#[derive(Clone)]
pub struct NotificationsService {
    repo: Repository,
}

impl NotificationsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Append a notification and return it
    pub async fn append(
        &self,
        note_id: Option<i64>,
        notification_type: NotificationType,
        is_important: bool,
    ) -> Result<NoteNotification> {
        self.repo
            .create_notification(note_id, &notification_type, is_important)
            .await
    }

    /// Fire-and-forget append used by lifecycle operations.
    ///
    /// Failures are logged and swallowed.
    pub async fn record(
        &self,
        note_id: Option<i64>,
        notification_type: NotificationType,
        is_important: bool,
    ) {
        if let Err(e) = self
            .repo
            .create_notification(note_id, &notification_type, is_important)
            .await
        {
            tracing::error!(
                "Failed to record {} notification for note {:?}: {}",
                notification_type,
                note_id,
                e
            );
        }
    }

    pub async fn list_all(&self) -> Result<Vec<NoteNotification>> {
        self.repo.list_notifications().await
    }

    pub async fn list_for_note(&self, note_id: i64) -> Result<Vec<NoteNotification>> {
        self.repo.list_notifications_for_note(note_id).await
    }

    /// Remove every notification about the given notes
    pub async fn delete_for_notes(&self, note_ids: &[i64]) -> Result<u64> {
        self.repo.delete_notifications_for_notes(note_ids).await
    }

    /// Remove the trash and pending-deletion notifications of a recovered note
    pub async fn delete_trashed_for_note(&self, note_id: i64) -> Result<u64> {
        self.repo
            .delete_notifications_for_note_of_types(note_id, &NotificationType::TRASHED)
            .await
    }

    pub async fn has_of_type(&self, note_id: i64, notification_type: &NotificationType) -> Result<bool> {
        self.repo
            .has_notification_of_type(note_id, notification_type)
            .await
    }

    /// Whether any of these notes has a notification pointing at it
    pub async fn any_for_notes(&self, note_ids: &[i64]) -> Result<bool> {
        self.repo.any_notifications_for_notes(note_ids).await
    }

    pub async fn mark_read(&self, id: i64) -> Result<bool> {
        self.repo.mark_notification_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<u64> {
        self.repo.mark_all_notifications_read().await
    }

    pub async fn unread_count(&self) -> Result<i64> {
        self.repo.count_unread_notifications().await
    }
}

/// Render a notification as user-facing text.
pub fn format_notification(notification_type: &NotificationType, note_id: Option<i64>) -> String {
    let subject = match note_id {
        Some(id) => format!("Note #{}", id),
        None => "A note".to_string(),
    };

    match notification_type {
        NotificationType::NoteCreatedBySync => {
            format!("{} was created from Azure DevOps sync", subject)
        }
        NotificationType::NoteSentToTrashBySync => {
            format!("{} was moved to the trash by Azure DevOps sync", subject)
        }
        NotificationType::NoteSentToTrashByUser => {
            format!("{} was moved to the trash manually", subject)
        }
        NotificationType::NoteDeletedSoon => {
            format!("{} will be permanently deleted soon", subject)
        }
        NotificationType::Unknown(_) => "You have a new notification".to_string(),
    }
}
