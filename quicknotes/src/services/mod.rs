//! Services module
//!
//! Business logic services that coordinate between the remote boundary
//! and the repository.

pub mod accounts;
pub mod autosave;
pub mod credentials;
pub mod notes;
pub mod notifications;
pub mod sync;
pub mod trash;

pub use accounts::{AccountCredential, AccountDecision, AccountService, PendingConfirmation};
pub use autosave::AutoSaver;
pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use notes::{NotesService, RecoverOutcome, SaveNoteRequest};
pub use notifications::{format_notification, NotificationsService};
pub use sync::{spawn_sync_worker, SyncOutcome, SyncReport, SyncService, SyncTrigger, SyncWorker};
pub use trash::{spawn_trash_sweeper, SweepReport, TrashSweeper};
