//! Notes service
//!
//! User-facing note lifecycle: save, auto-save, trash, recover and purge.
//! Title rules are enforced here; the repository stores whatever it is
//! given.

use crate::database::{
    CreateNoteRequest, Note, NotificationType, RemoteId, Repository, UpdateNoteRequest,
};
use crate::error::{AppError, Result, ValidationError};
use crate::remote::RemoteBoundary;
use crate::services::NotificationsService;
use chrono::Utc;
use std::sync::Arc;

/// Suffix given to unlinked copies of recovered notes
const COPY_SUFFIX: &str = " (copy)";

/// Save request from the editor.
///
/// No `id` means create; a title is then required.
#[derive(Debug, Clone, Default)]
pub struct SaveNoteRequest {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Result of asking to recover a trashed note
#[derive(Debug, Clone, PartialEq)]
pub enum RecoverOutcome {
    Recovered(Note),
    /// The linked remote item is closed or gone. The note is still in the
    /// trash; the caller may recover it as an unlinked copy instead.
    RemoteFinished(Note),
}

/// First title among `preferred`, `fallback`, `fallback 2`, ... that no
/// active note uses
pub(crate) async fn unique_title(repo: &Repository, preferred: &str, fallback: &str) -> Result<String> {
    if repo.is_title_unique(None, preferred).await? {
        return Ok(preferred.to_string());
    }
    if repo.is_title_unique(None, fallback).await? {
        return Ok(fallback.to_string());
    }

    let mut counter = 2;
    loop {
        let candidate = format!("{} {}", fallback, counter);
        if repo.is_title_unique(None, &candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Service for managing notes
#[derive(Clone)]
pub struct NotesService {
    repo: Repository,
    notifications: NotificationsService,
    remote: Arc<dyn RemoteBoundary>,
}

impl NotesService {
    pub fn new(
        repo: Repository,
        notifications: NotificationsService,
        remote: Arc<dyn RemoteBoundary>,
    ) -> Self {
        Self {
            repo,
            notifications,
            remote,
        }
    }

    /// Trim and check a title against the active notes
    async fn validate_title(&self, id: Option<i64>, title: &str) -> Result<String> {
        let title = title.trim();

        if title.is_empty() {
            return Err(ValidationError::BlankTitle.into());
        }

        if !self.repo.is_title_unique(id, title).await? {
            return Err(ValidationError::DuplicateTitle(title.to_string()).into());
        }

        Ok(title.to_string())
    }

    /// Create or update a note from the editor.
    ///
    /// Nothing is written when validation fails.
    pub async fn save_note(&self, req: SaveNoteRequest) -> Result<Note> {
        let title = match req.title.as_deref() {
            Some(title) => Some(self.validate_title(req.id, title).await?),
            None => None,
        };

        match req.id {
            None => {
                let title = title.ok_or(AppError::Validation(ValidationError::BlankTitle))?;
                tracing::info!("Creating new note: {}", title);

                let note = self
                    .repo
                    .create_note(CreateNoteRequest {
                        title,
                        content: req.content.unwrap_or_default(),
                        azure_id: None,
                    })
                    .await?;

                tracing::info!("Note created successfully: {}", note.id);
                Ok(note)
            }
            Some(id) => {
                tracing::debug!("Saving note: {}", id);

                let note = self
                    .repo
                    .update_note(
                        id,
                        UpdateNoteRequest {
                            title,
                            content: req.content,
                            last_saved_at: Some(Utc::now()),
                        },
                    )
                    .await?;

                tracing::debug!("Note saved successfully: {}", note.id);
                Ok(note)
            }
        }
    }

    /// Persist editor content without touching the title
    pub async fn auto_save(&self, id: i64, content: String) -> Result<Note> {
        let note = self
            .repo
            .update_note(
                id,
                UpdateNoteRequest {
                    title: None,
                    content: Some(content),
                    last_saved_at: Some(Utc::now()),
                },
            )
            .await?;

        tracing::debug!("Auto-saved note: {}", id);
        Ok(note)
    }

    pub async fn get_note(&self, id: i64) -> Result<Note> {
        self.repo.get_note(id).await
    }

    pub async fn list_active_notes(&self) -> Result<Vec<Note>> {
        self.repo.list_active_notes().await
    }

    pub async fn list_trashed_notes(&self) -> Result<Vec<Note>> {
        self.repo.list_trashed_notes().await
    }

    pub async fn count_trashed(&self) -> Result<i64> {
        self.repo.count_trashed_notes().await
    }

    /// Search active notes by title or content
    pub async fn search_notes(&self, query: &str) -> Result<Vec<Note>> {
        if query.trim().is_empty() {
            return self.list_active_notes().await;
        }

        self.repo.search_notes(query).await
    }

    /// Move a note to the trash on the user's behalf.
    ///
    /// Returns `false` when it was already trashed.
    pub async fn trash_note(&self, id: i64) -> Result<bool> {
        let moved = self.repo.soft_delete_note(id).await?;

        if moved {
            tracing::info!("Note moved to trash: {}", id);
            self.notifications
                .record(Some(id), NotificationType::NoteSentToTrashByUser, false)
                .await;
        }

        Ok(moved)
    }

    /// Whether the remote item behind a linked note is finished.
    ///
    /// An unreachable remote counts as not finished; the next sync trashes
    /// the note again if the item really closed.
    async fn linked_item_finished(&self, azure_id: RemoteId) -> bool {
        match self.remote.is_remote_item_finished(azure_id).await {
            Ok(finished) => finished,
            Err(e) => {
                tracing::warn!(
                    "Could not check remote item {}, recovering anyway: {}",
                    azure_id,
                    e
                );
                false
            }
        }
    }

    /// Bring a trashed note back.
    ///
    /// A linked note whose remote item is finished stays in the trash and
    /// `RemoteFinished` is returned instead.
    pub async fn recover_note(&self, id: i64) -> Result<RecoverOutcome> {
        let note = self.repo.get_note(id).await?;

        if note.is_active() {
            return Ok(RecoverOutcome::Recovered(note));
        }

        if let Some(azure_id) = note.azure_id {
            if self.linked_item_finished(azure_id).await {
                tracing::info!(
                    "Note {} is linked to finished remote item {}, not recovering",
                    id,
                    azure_id
                );
                return Ok(RecoverOutcome::RemoteFinished(note));
            }
        }

        if !self.repo.is_title_unique(Some(id), &note.title).await? {
            return Err(ValidationError::DuplicateTitle(note.title.trim().to_string()).into());
        }

        self.repo.recover_note(id).await?;

        if let Err(e) = self.notifications.delete_trashed_for_note(id).await {
            tracing::error!("Failed to clear trash notifications for note {}: {}", id, e);
        }

        tracing::info!("Note recovered: {}", id);
        self.repo.get_note(id).await.map(RecoverOutcome::Recovered)
    }

    /// Recover a trashed note as a new, unlinked note.
    ///
    /// The trashed original is left where it is.
    pub async fn recover_as_unlinked_copy(&self, id: i64) -> Result<Note> {
        let original = self.repo.get_note(id).await?;

        let base = format!("{}{}", original.title.trim(), COPY_SUFFIX);
        let title = unique_title(&self.repo, &base, &base).await?;

        let copy = self
            .repo
            .create_note(CreateNoteRequest {
                title,
                content: original.content,
                azure_id: None,
            })
            .await?;

        tracing::info!("Recovered note {} as unlinked copy {}", id, copy.id);
        Ok(copy)
    }

    /// Permanently delete a note.
    ///
    /// Linked notes enter the graveyard before anything is removed, so a
    /// failure part way never lets sync recreate the note.
    pub async fn purge_note(&self, id: i64) -> Result<()> {
        let note = self.repo.get_note(id).await?;

        if let Some(azure_id) = note.azure_id {
            self.repo.add_to_graveyard(azure_id).await?;
        }

        self.notifications.delete_for_notes(&[id]).await?;
        self.repo.hard_delete_note(id).await?;

        tracing::info!("Note purged: {}", id);
        Ok(())
    }

    /// Purge every trashed note and return how many were removed
    pub async fn empty_trash(&self) -> Result<usize> {
        let trashed = self.repo.list_trashed_notes().await?;

        for note in &trashed {
            self.purge_note(note.id).await?;
        }

        tracing::info!("Emptied trash: {} note(s) purged", trashed.len());
        Ok(trashed.len())
    }
}
