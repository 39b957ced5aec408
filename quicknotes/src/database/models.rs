//! Database models
//!
//! Rust structs representing database entities.
//! All models use serde for serialization to whatever hosts the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Identifier of a work item in the remote tracking system
pub type RemoteId = i64;

/// A note, optionally linked to a remote work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Note {
    pub id: i64,
    /// Stable external-facing UUID
    pub note_id: String,
    /// Linked remote work item, if the note came from sync
    pub azure_id: Option<RemoteId>,
    pub title: String,
    /// Opaque rich-text payload
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub soft_deleted: bool,
    pub trashed_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn is_active(&self) -> bool {
        !self.soft_deleted
    }
}

/// Create note request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    pub content: String,
    pub azure_id: Option<RemoteId>,
}

/// Partial update of a note. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// Lifecycle event recorded in the notification ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NoteCreatedBySync,
    NoteSentToTrashBySync,
    NoteSentToTrashByUser,
    NoteDeletedSoon,
    /// A stored value this build does not recognize
    #[serde(untagged)]
    Unknown(String),
}

impl NotificationType {
    /// Notifications that only describe a note while it is in the trash
    pub const TRASHED: [NotificationType; 3] = [
        NotificationType::NoteSentToTrashBySync,
        NotificationType::NoteSentToTrashByUser,
        NotificationType::NoteDeletedSoon,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::NoteCreatedBySync => "NOTE_CREATED_BY_SYNC",
            NotificationType::NoteSentToTrashBySync => "NOTE_SENT_TO_TRASH_BY_SYNC",
            NotificationType::NoteSentToTrashByUser => "NOTE_SENT_TO_TRASH_BY_USER",
            NotificationType::NoteDeletedSoon => "NOTE_DELETED_SOON",
            NotificationType::Unknown(raw) => raw,
        }
    }
}

impl From<String> for NotificationType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "NOTE_CREATED_BY_SYNC" => NotificationType::NoteCreatedBySync,
            "NOTE_SENT_TO_TRASH_BY_SYNC" => NotificationType::NoteSentToTrashBySync,
            "NOTE_SENT_TO_TRASH_BY_USER" => NotificationType::NoteSentToTrashByUser,
            "NOTE_DELETED_SOON" => NotificationType::NoteDeletedSoon,
            _ => NotificationType::Unknown(raw),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in the notification ledger
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NoteNotification {
    pub id: i64,
    /// Subject note; may dangle until the note itself is purged
    pub note_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub notification_type: NotificationType,
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Remote id whose note was purged and must never be recreated
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GraveyardEntry {
    pub id: i64,
    pub third_party_id: RemoteId,
}

/// Kind of remote work tracking system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    AzureDevops,
}

/// Credential kind used for the linked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum AuthMethod {
    #[serde(rename = "PAT")]
    #[sqlx(rename = "PAT")]
    Pat,
    #[serde(rename = "OAUTH")]
    #[sqlx(rename = "OAUTH")]
    OAuth,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Pat => f.write_str("PAT"),
            AuthMethod::OAuth => f.write_str("OAUTH"),
        }
    }
}

/// The single linked external account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThirdPartyAccount {
    pub id: i64,
    pub account_type: AccountType,
    /// Unknown until the first successful remote query
    pub third_party_user_id: Option<String>,
    pub auth_method: AuthMethod,
    pub organization_name: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Account a user asks to link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThirdPartyAccount {
    pub account_type: AccountType,
    pub third_party_user_id: Option<String>,
    pub auth_method: AuthMethod,
    pub organization_name: String,
    pub project_name: String,
}
