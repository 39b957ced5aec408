//! Integration tests for QuickNotes
//!
//! These tests verify end-to-end functionality including:
//! - Note lifecycle against a file-backed database
//! - Reconciliation cycles against a scripted work item set
//! - Account linking and sync through the Azure DevOps client

use async_trait::async_trait;
use quicknotes::app::AppState;
use quicknotes::config::AppConfig;
use quicknotes::database::{
    create_pool, AccountType, AuthMethod, NewThirdPartyAccount, NotificationType, RemoteId,
    Repository,
};
use quicknotes::error::{AppError, Result, ValidationError};
use quicknotes::remote::{compute_plan, ReconciliationPlan, RemoteAuth, RemoteBoundary, RemoteWorkItem};
use quicknotes::services::{
    AccountCredential, AccountDecision, AccountService, MemoryCredentialStore, NotesService,
    NotificationsService, RecoverOutcome, SaveNoteRequest, SyncOutcome, SyncReport, SyncService,
    SyncTrigger,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Work items assigned to the user, as the remote sees them
#[derive(Default)]
struct WorkItemSet {
    items: Mutex<Vec<RemoteWorkItem>>,
    /// Ignore the graveyard snapshot when classifying
    naive: bool,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl WorkItemSet {
    fn naive() -> Self {
        Self {
            naive: true,
            ..Default::default()
        }
    }

    fn open(&self, id: RemoteId, title: &str) {
        self.items.lock().unwrap().push(RemoteWorkItem {
            id,
            title: title.to_string(),
            closed: false,
        });
    }

    fn close(&self, id: RemoteId) {
        for item in self.items.lock().unwrap().iter_mut() {
            if item.id == id {
                item.closed = true;
            }
        }
    }
}

#[async_trait]
impl RemoteBoundary for WorkItemSet {
    async fn fetch_reconciliation_plan(
        &self,
        active: &HashSet<RemoteId>,
        trashed: &HashSet<RemoteId>,
        graveyard: &HashSet<RemoteId>,
    ) -> Result<ReconciliationPlan> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let items = self.items.lock().unwrap().clone();
        let ignored = HashSet::new();
        let graveyard = if self.naive { &ignored } else { graveyard };

        Ok(compute_plan(&items, active, trashed, graveyard))
    }

    async fn is_remote_item_finished(&self, remote_id: RemoteId) -> Result<bool> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .find(|item| item.id == remote_id)
            .map(|item| item.closed)
            .unwrap_or(true))
    }
}

struct AcceptingAuth;

#[async_trait]
impl RemoteAuth for AcceptingAuth {
    async fn validate_pat(&self, _organization: &str, _project: &str, _pat: &str) -> Result<()> {
        Ok(())
    }

    async fn obtain_oauth_token(&self) -> Result<String> {
        Ok("token".to_string())
    }

    async fn lookup_user_id(
        &self,
        _organization: &str,
        _auth_method: AuthMethod,
        _secret: &str,
    ) -> Result<Option<String>> {
        Ok(Some("user-1".to_string()))
    }
}

struct Harness {
    repo: Repository,
    notes: NotesService,
    sync: SyncService,
    _temp: TempDir,
}

/// Helper to wire the engine against a file-backed database
async fn create_harness(remote: Arc<WorkItemSet>) -> Harness {
    let temp = TempDir::new().unwrap();
    let pool = create_pool(&temp.path().join("test.db")).await.unwrap();
    let repo = Repository::new(pool);

    let notifications = NotificationsService::new(repo.clone());
    let notes = NotesService::new(repo.clone(), notifications.clone(), remote.clone());
    let accounts = AccountService::new(
        repo.clone(),
        Arc::new(MemoryCredentialStore::with_secret("pat")),
        Arc::new(AcceptingAuth),
    );
    accounts
        .set(&NewThirdPartyAccount {
            account_type: AccountType::AzureDevops,
            third_party_user_id: Some("user-1".to_string()),
            auth_method: AuthMethod::Pat,
            organization_name: "contoso".to_string(),
            project_name: "notes".to_string(),
        })
        .await
        .unwrap();

    let sync = SyncService::new(repo.clone(), notifications, accounts, remote);

    Harness {
        repo,
        notes,
        sync,
        _temp: temp,
    }
}

async fn sync_once(harness: &Harness) -> SyncReport {
    match harness.sync.run_cycle(SyncTrigger::Manual).await.unwrap() {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {:?}", other),
    }
}

fn titled(title: &str) -> SaveNoteRequest {
    SaveNoteRequest {
        id: None,
        title: Some(title.to_string()),
        content: Some("{}".to_string()),
    }
}

#[tokio::test]
async fn test_duplicate_title_is_rejected_without_writing() {
    let harness = create_harness(Arc::new(WorkItemSet::default())).await;

    let original = harness.notes.save_note(titled("Sprint Plan")).await.unwrap();

    let err = harness.notes.save_note(titled("Sprint Plan")).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Validation(ValidationError::DuplicateTitle(_))
    ));

    let notes = harness.repo.list_notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0], original);

    // A trashed note may share a title with an active one
    harness.notes.trash_note(original.id).await.unwrap();
    harness.notes.save_note(titled("Sprint Plan")).await.unwrap();
    assert_eq!(harness.repo.list_notes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cycle_creates_one_note_per_new_remote_item() {
    let remote = Arc::new(WorkItemSet::default());
    remote.open(42, "Fix bug");
    let harness = create_harness(remote).await;

    let report = sync_once(&harness).await;
    assert_eq!(report.created, 1);

    let active = harness.notes.list_active_notes().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].azure_id, Some(42));
    assert_eq!(active[0].title, "Fix bug");

    let notifications = harness.repo.list_notifications().await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].note_id, Some(active[0].id));
    assert_eq!(
        notifications[0].notification_type,
        NotificationType::NoteCreatedBySync
    );
}

#[tokio::test]
async fn test_second_cycle_without_remote_change_is_a_no_op() {
    let remote = Arc::new(WorkItemSet::default());
    remote.open(1, "Open");
    remote.open(2, "Closing");
    let harness = create_harness(remote.clone()).await;

    sync_once(&harness).await;
    remote.close(2);
    sync_once(&harness).await;

    let notes_before = harness.repo.list_notes().await.unwrap();
    let notifications_before = harness.repo.list_notifications().await.unwrap().len();

    let report = sync_once(&harness).await;
    assert_eq!((report.created, report.trashed), (0, 0));

    assert_eq!(harness.repo.list_notes().await.unwrap(), notes_before);
    assert_eq!(
        harness.repo.list_notifications().await.unwrap().len(),
        notifications_before
    );
}

#[tokio::test]
async fn test_purged_note_is_never_recreated() {
    let remote = Arc::new(WorkItemSet::default());
    remote.open(42, "Fix bug");
    let harness = create_harness(remote).await;

    sync_once(&harness).await;
    let note = harness.notes.list_active_notes().await.unwrap().remove(0);
    harness.notes.trash_note(note.id).await.unwrap();
    harness.notes.purge_note(note.id).await.unwrap();

    for _ in 0..3 {
        let report = sync_once(&harness).await;
        assert_eq!(report.created, 0);
    }

    assert!(harness.repo.list_notes().await.unwrap().is_empty());
    assert!(harness.repo.graveyard_ids().await.unwrap().contains(&42));
}

#[tokio::test]
async fn test_naive_remote_cannot_resurrect_graveyarded_item() {
    // The remote ignores the graveyard snapshot and keeps asking for 42.
    // The engine re-filters creates locally, so the item stays buried.
    let remote = Arc::new(WorkItemSet::naive());
    remote.open(42, "Fix bug");
    let harness = create_harness(remote).await;

    sync_once(&harness).await;
    let note = harness.notes.list_active_notes().await.unwrap().remove(0);
    harness.notes.purge_note(note.id).await.unwrap();

    let report = sync_once(&harness).await;
    assert_eq!(report.created, 0);
    assert_eq!(report.skipped, 1);
    assert!(harness.repo.list_notes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_notifications_follow_note_lifecycle() {
    let remote = Arc::new(WorkItemSet::default());
    remote.open(7, "Review");
    let harness = create_harness(remote).await;

    sync_once(&harness).await;
    let note = harness.notes.list_active_notes().await.unwrap().remove(0);

    harness.notes.trash_note(note.id).await.unwrap();
    assert_eq!(
        harness.repo.list_notifications_for_note(note.id).await.unwrap().len(),
        2
    );

    // Recovery drops only the trash notification
    let outcome = harness.notes.recover_note(note.id).await.unwrap();
    assert!(matches!(outcome, RecoverOutcome::Recovered(_)));

    let remaining = harness.repo.list_notifications_for_note(note.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining[0].notification_type,
        NotificationType::NoteCreatedBySync
    );

    // Purge drops everything
    harness.notes.purge_note(note.id).await.unwrap();
    assert!(harness
        .repo
        .list_notifications_for_note(note.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_recover_of_finished_item_offers_unlinked_copy() {
    let remote = Arc::new(WorkItemSet::default());
    remote.open(9, "Deploy");
    let harness = create_harness(remote.clone()).await;

    sync_once(&harness).await;
    remote.close(9);
    let report = sync_once(&harness).await;
    assert_eq!(report.trashed, 1);

    let trashed = harness.notes.list_trashed_notes().await.unwrap().remove(0);
    let outcome = harness.notes.recover_note(trashed.id).await.unwrap();
    assert!(matches!(outcome, RecoverOutcome::RemoteFinished(_)));

    let copy = harness.notes.recover_as_unlinked_copy(trashed.id).await.unwrap();
    assert_eq!(copy.title, "Deploy (copy)");
    assert_eq!(copy.azure_id, None);

    // The copy is not linked, so later cycles leave it alone
    let report = sync_once(&harness).await;
    assert_eq!((report.created, report.trashed), (0, 0));
    assert!(harness.notes.get_note(copy.id).await.unwrap().is_active());
}

#[tokio::test]
async fn test_concurrent_triggers_run_a_single_cycle() {
    let remote = Arc::new(WorkItemSet {
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    remote.open(42, "Fix bug");
    let harness = create_harness(remote.clone()).await;

    let (a, b) = tokio::join!(
        harness.sync.run_cycle(SyncTrigger::Timer),
        harness.sync.run_cycle(SyncTrigger::Manual)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::AlreadyRunning))
            .count(),
        1
    );
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.repo.list_notes().await.unwrap().len(), 1);
    assert_eq!(harness.repo.list_notifications().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_app_links_account_and_syncs_with_devops() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contoso/notes/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workItems": [{"id": 42}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/connectionData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authenticatedUser": {"id": "user-guid"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/notes/_apis/wit/workitemsbatch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "value": [{
                "id": 42,
                "fields": {
                    "System.Title": "Fix bug",
                    "System.AssignedTo": {"id": "user-guid", "uniqueName": "dev@contoso.com"}
                }
            }]
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let config = AppConfig {
        data_dir: temp.path().join("data"),
        devops_base_url: server.uri(),
        ..Default::default()
    };
    let state = AppState::with_credentials(config, Arc::new(MemoryCredentialStore::default()))
        .await
        .unwrap();

    let outcome = state.sync.run_cycle(SyncTrigger::Manual).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NoAccount);

    let decision = state
        .accounts
        .connect(
            "contoso",
            "notes",
            AccountCredential::Pat("secret-pat".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(decision, AccountDecision::Applied);
    assert!(state.accounts.has_credential());

    let account = state.accounts.get().await.unwrap().unwrap();
    assert_eq!(account.third_party_user_id.as_deref(), Some("user-guid"));

    match state.sync.run_cycle(SyncTrigger::Manual).await.unwrap() {
        SyncOutcome::Completed(report) => assert_eq!(report.created, 1),
        other => panic!("expected a completed cycle, got {:?}", other),
    }

    let lists = state.sync.note_lists().await;
    assert_eq!(lists.active.len(), 1);
    assert_eq!(lists.active[0].azure_id, Some(42));

    let tasks = state.start_background_tasks();
    state.shutdown(tasks).await;
}
