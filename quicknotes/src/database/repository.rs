//! Repository layer for database operations
//!
//! This module provides the storage operations for all four record
//! collections: notes, the notification ledger, the graveyard and the
//! third-party account singleton. Every method is a single atomic
//! statement; there are no cross-call transactions.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

/// Fixed primary key of the account singleton
const ACCOUNT_ROW_ID: i64 = 1;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Close the underlying pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ===== Notes =====

    /// Create a new active note
    pub async fn create_note(&self, req: CreateNoteRequest) -> Result<Note> {
        let note_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let note = sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (note_id, azure_id, title, content, created_at, soft_deleted)
            VALUES (?, ?, ?, ?, ?, 0)
            RETURNING *
            "#,
        )
        .bind(&note_id)
        .bind(req.azure_id)
        .bind(&req.title)
        .bind(&req.content)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created note: {} ({})", note.id, note_id);
        Ok(note)
    }

    /// Get a note by ID, active or trashed
    pub async fn get_note(&self, id: i64) -> Result<Note> {
        sqlx::query_as::<_, Note>("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NoteNotFound(id))
    }

    /// List every note regardless of state
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>("SELECT * FROM notes ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(notes)
    }

    /// List active (non-trashed) notes
    pub async fn list_active_notes(&self) -> Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>(
            r#"
            SELECT * FROM notes
            WHERE soft_deleted = 0
            ORDER BY COALESCE(last_saved_at, created_at) DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    /// List notes in the trash
    pub async fn list_trashed_notes(&self) -> Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>(
            r#"
            SELECT * FROM notes
            WHERE soft_deleted = 1
            ORDER BY trashed_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    /// Trashed notes that entered the trash before `cutoff`
    pub async fn list_trashed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>(
            r#"
            SELECT * FROM notes
            WHERE soft_deleted = 1 AND trashed_at IS NOT NULL AND trashed_at < ?
            ORDER BY trashed_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    pub async fn count_trashed_notes(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes WHERE soft_deleted = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Case-insensitive title/content match over active notes
    pub async fn search_notes(&self, query: &str) -> Result<Vec<Note>> {
        let escaped = query
            .trim()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped.to_lowercase());

        let notes = sqlx::query_as::<_, Note>(
            r#"
            SELECT * FROM notes
            WHERE soft_deleted = 0
              AND (LOWER(title) LIKE ? ESCAPE '\' OR LOWER(content) LIKE ? ESCAPE '\')
            ORDER BY COALESCE(last_saved_at, created_at) DESC, id DESC
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    /// Update a note in place.
    ///
    /// Only the supplied fields are written; concurrent updates to the same
    /// note resolve as last write wins per field.
    pub async fn update_note(&self, id: i64, req: UpdateNoteRequest) -> Result<Note> {
        sqlx::query_as::<_, Note>(
            r#"
            UPDATE notes SET
                title = COALESCE(?, title),
                content = COALESCE(?, content),
                last_saved_at = COALESCE(?, last_saved_at)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(req.title)
        .bind(req.content)
        .bind(req.last_saved_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NoteNotFound(id))
    }

    /// Move a note to the trash.
    ///
    /// Returns `false` when the note was already trashed.
    pub async fn soft_delete_note(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE notes SET soft_deleted = 1, trashed_at = ? WHERE id = ? AND soft_deleted = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            // Distinguish "already trashed" from "missing"
            self.get_note(id).await?;
            return Ok(false);
        }

        tracing::debug!("Soft deleted note: {}", id);
        Ok(true)
    }

    /// Restore a trashed note.
    ///
    /// Returns `false` when the note was already active.
    pub async fn recover_note(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE notes SET soft_deleted = 0, trashed_at = NULL WHERE id = ? AND soft_deleted = 1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            self.get_note(id).await?;
            return Ok(false);
        }

        tracing::debug!("Recovered note: {}", id);
        Ok(true)
    }

    /// Permanently delete a note row.
    ///
    /// Unconditional: callers must write the graveyard first for linked notes.
    pub async fn hard_delete_note(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Hard deleted note: {}", id);
        Ok(rows > 0)
    }

    /// Trash every note linked to `azure_id`.
    ///
    /// Returns the ids of the notes that actually moved to the trash.
    pub async fn soft_delete_notes_by_azure_id(&self, azure_id: RemoteId) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE notes SET soft_deleted = 1, trashed_at = ?
            WHERE azure_id = ? AND soft_deleted = 0
            RETURNING id
            "#,
        )
        .bind(Utc::now())
        .bind(azure_id)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!("Soft deleted {} note(s) for remote item {}", ids.len(), azure_id);
        Ok(ids)
    }

    /// Check that no active note other than `excluding` uses `title`
    pub async fn is_title_unique(&self, excluding: Option<i64>, title: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notes
            WHERE soft_deleted = 0 AND title = ? AND (? IS NULL OR id <> ?)
            "#,
        )
        .bind(title.trim())
        .bind(excluding)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;

        Ok(count == 0)
    }

    /// Remote ids linked to active notes
    pub async fn active_azure_ids(&self) -> Result<HashSet<RemoteId>> {
        self.azure_ids_where(false).await
    }

    /// Remote ids linked to trashed notes
    pub async fn trashed_azure_ids(&self) -> Result<HashSet<RemoteId>> {
        self.azure_ids_where(true).await
    }

    async fn azure_ids_where(&self, soft_deleted: bool) -> Result<HashSet<RemoteId>> {
        let ids: Vec<RemoteId> = sqlx::query_scalar(
            "SELECT DISTINCT azure_id FROM notes WHERE azure_id IS NOT NULL AND soft_deleted = ?",
        )
        .bind(soft_deleted)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    // ===== Notifications =====

    /// Append a notification to the ledger
    pub async fn create_notification(
        &self,
        note_id: Option<i64>,
        notification_type: &NotificationType,
        is_important: bool,
    ) -> Result<NoteNotification> {
        let notification = sqlx::query_as::<_, NoteNotification>(
            r#"
            INSERT INTO notifications (note_id, notification_type, is_important, created_at, is_read)
            VALUES (?, ?, ?, ?, 0)
            RETURNING *
            "#,
        )
        .bind(note_id)
        .bind(notification_type.as_str())
        .bind(is_important)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            "Created notification {} ({}) for note {:?}",
            notification.id,
            notification_type,
            note_id
        );
        Ok(notification)
    }

    pub async fn list_notifications(&self) -> Result<Vec<NoteNotification>> {
        let notifications = sqlx::query_as::<_, NoteNotification>(
            "SELECT * FROM notifications ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    pub async fn list_notifications_for_note(&self, note_id: i64) -> Result<Vec<NoteNotification>> {
        let notifications = sqlx::query_as::<_, NoteNotification>(
            "SELECT * FROM notifications WHERE note_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(note_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    /// Delete every notification referencing any of `note_ids`
    pub async fn delete_notifications_for_notes(&self, note_ids: &[i64]) -> Result<u64> {
        if note_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM notifications WHERE note_id IN (");
        let mut separated = query.separated(", ");
        for id in note_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = query.build().execute(&self.pool).await?.rows_affected();

        tracing::debug!("Deleted {} notification(s) for notes {:?}", rows, note_ids);
        Ok(rows)
    }

    /// Delete the notifications of the given types for one note
    pub async fn delete_notifications_for_note_of_types(
        &self,
        note_id: i64,
        types: &[NotificationType],
    ) -> Result<u64> {
        if types.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM notifications WHERE note_id = ");
        query.push_bind(note_id);
        query.push(" AND notification_type IN (");
        let mut separated = query.separated(", ");
        for notification_type in types {
            separated.push_bind(notification_type.as_str().to_string());
        }
        separated.push_unseparated(")");

        let rows = query.build().execute(&self.pool).await?.rows_affected();

        tracing::debug!("Deleted {} notification(s) for note {}", rows, note_id);
        Ok(rows)
    }

    /// Whether any notification references one of `note_ids`
    pub async fn any_notifications_for_notes(&self, note_ids: &[i64]) -> Result<bool> {
        if note_ids.is_empty() {
            return Ok(false);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT EXISTS (SELECT 1 FROM notifications WHERE note_id IN (");
        let mut separated = query.separated(", ");
        for id in note_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated("))");

        let exists: bool = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(exists)
    }

    pub async fn has_notification_of_type(
        &self,
        note_id: i64,
        notification_type: &NotificationType,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications WHERE note_id = ? AND notification_type = ?
            )
            "#,
        )
        .bind(note_id)
        .bind(notification_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Mark a notification as read. Returns `false` if it does not exist.
    pub async fn mark_notification_read(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    pub async fn mark_all_notifications_read(&self) -> Result<u64> {
        let rows = sqlx::query("UPDATE notifications SET is_read = 1 WHERE is_read = 0")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows)
    }

    pub async fn count_unread_notifications(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE is_read = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // ===== Graveyard =====

    /// Record a purged remote id. Adding an id twice is a no-op.
    pub async fn add_to_graveyard(&self, third_party_id: RemoteId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO graveyard (third_party_id) VALUES (?)")
            .bind(third_party_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Graveyard entry recorded for remote item {}", third_party_id);
        Ok(())
    }

    pub async fn graveyard_ids(&self) -> Result<HashSet<RemoteId>> {
        let ids: Vec<RemoteId> = sqlx::query_scalar("SELECT third_party_id FROM graveyard")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().collect())
    }

    // ===== Third-party account =====

    pub async fn get_account(&self) -> Result<Option<ThirdPartyAccount>> {
        let account =
            sqlx::query_as::<_, ThirdPartyAccount>("SELECT * FROM third_party_account WHERE id = ?")
                .bind(ACCOUNT_ROW_ID)
                .fetch_optional(&self.pool)
                .await?;

        Ok(account)
    }

    /// Create the account singleton or overwrite it in place
    pub async fn upsert_account(
        &self,
        account: &NewThirdPartyAccount,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<ThirdPartyAccount> {
        let saved = sqlx::query_as::<_, ThirdPartyAccount>(
            r#"
            INSERT INTO third_party_account (
                id, account_type, third_party_user_id, auth_method,
                organization_name, project_name, created_at, last_synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_type = excluded.account_type,
                third_party_user_id = excluded.third_party_user_id,
                auth_method = excluded.auth_method,
                organization_name = excluded.organization_name,
                project_name = excluded.project_name,
                created_at = excluded.created_at,
                last_synced_at = excluded.last_synced_at
            RETURNING *
            "#,
        )
        .bind(ACCOUNT_ROW_ID)
        .bind(account.account_type)
        .bind(&account.third_party_user_id)
        .bind(account.auth_method)
        .bind(&account.organization_name)
        .bind(&account.project_name)
        .bind(Utc::now())
        .bind(last_synced_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Saved third-party account ({})", saved.auth_method);
        Ok(saved)
    }

    /// Change the target organization/project of the existing account
    pub async fn update_account_project(
        &self,
        organization_name: &str,
        project_name: &str,
    ) -> Result<Option<ThirdPartyAccount>> {
        let account = sqlx::query_as::<_, ThirdPartyAccount>(
            r#"
            UPDATE third_party_account SET organization_name = ?, project_name = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(organization_name)
        .bind(project_name)
        .bind(ACCOUNT_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Fill in the remote user id if it is still unknown
    pub async fn set_account_user_id_if_missing(&self, user_id: &str) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE third_party_account SET third_party_user_id = ?
            WHERE id = ? AND third_party_user_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(ACCOUNT_ROW_ID)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Stamp `last_synced_at`. Returns `false` when no account exists.
    pub async fn set_account_last_synced_at(&self, at: DateTime<Utc>) -> Result<bool> {
        let rows = sqlx::query("UPDATE third_party_account SET last_synced_at = ? WHERE id = ?")
            .bind(at)
            .bind(ACCOUNT_ROW_ID)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    pub async fn delete_account(&self) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM third_party_account WHERE id = ?")
            .bind(ACCOUNT_ROW_ID)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }
}
