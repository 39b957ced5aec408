//! Reconciliation engine
//!
//! Pulls a plan from the remote boundary and applies it to the local
//! store. Only one cycle runs at a time; a request that arrives while a
//! cycle is running is dropped, not queued.

use crate::database::{CreateNoteRequest, Note, NotificationType, RemoteId, Repository};
use crate::error::Result;
use crate::remote::{CreateInstruction, RemoteBoundary};
use crate::services::notes::unique_title;
use crate::services::{AccountService, NotificationsService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What asked for a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncTrigger {
    Startup,
    Timer,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Timer => "timer",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub created: usize,
    pub trashed: usize,
    /// Create instructions dropped by the local re-filter
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another cycle held the latch
    AlreadyRunning,
    /// No account is linked
    NoAccount,
}

/// Cached note lists for display, refreshed after every cycle
#[derive(Debug, Clone, Default)]
pub struct NoteLists {
    pub active: Vec<Note>,
    pub trashed: Vec<Note>,
}

/// Holds the running latch for the life of a cycle
struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Local snapshot taken at the start of a cycle
struct Snapshot {
    active: HashSet<RemoteId>,
    trashed: HashSet<RemoteId>,
    graveyard: HashSet<RemoteId>,
}

impl Snapshot {
    fn knows(&self, remote_id: RemoteId) -> bool {
        self.active.contains(&remote_id)
            || self.trashed.contains(&remote_id)
            || self.graveyard.contains(&remote_id)
    }
}

#[derive(Clone)]
pub struct SyncService {
    repo: Repository,
    notifications: NotificationsService,
    accounts: AccountService,
    remote: Arc<dyn RemoteBoundary>,
    running: Arc<AtomicBool>,
    lists: Arc<RwLock<NoteLists>>,
}

impl SyncService {
    pub fn new(
        repo: Repository,
        notifications: NotificationsService,
        accounts: AccountService,
        remote: Arc<dyn RemoteBoundary>,
    ) -> Self {
        Self {
            repo,
            notifications,
            accounts,
            remote,
            running: Arc::new(AtomicBool::new(false)),
            lists: Arc::new(RwLock::new(NoteLists::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Latest cached note lists
    pub async fn note_lists(&self) -> NoteLists {
        self.lists.read().await.clone()
    }

    /// Reload the cached note lists from the store
    pub async fn refresh_note_lists(&self) -> Result<()> {
        let active = self.repo.list_active_notes().await?;
        let trashed = self.repo.list_trashed_notes().await?;

        *self.lists.write().await = NoteLists { active, trashed };
        Ok(())
    }

    /// Run one reconciliation cycle.
    ///
    /// Steps that completed before a failure stay applied. The error is
    /// logged here and returned to the caller.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            tracing::info!("Sync already running, dropping {} request", trigger);
            return Ok(SyncOutcome::AlreadyRunning);
        };

        match self.reconcile(trigger).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Sync cycle ({}) failed: {}", trigger, e);
                Err(e)
            }
        }
    }

    async fn reconcile(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        if self.accounts.get().await?.is_none() {
            tracing::debug!("No linked account, skipping {} sync", trigger);
            return Ok(SyncOutcome::NoAccount);
        }

        let started_at = Utc::now();
        tracing::info!("Sync cycle started ({})", trigger);

        let snapshot = Snapshot {
            active: self.repo.active_azure_ids().await?,
            trashed: self.repo.trashed_azure_ids().await?,
            graveyard: self.repo.graveyard_ids().await?,
        };

        let plan = self
            .remote
            .fetch_reconciliation_plan(&snapshot.active, &snapshot.trashed, &snapshot.graveyard)
            .await?;

        tracing::debug!(
            "Plan: {} to create, {} to delete",
            plan.to_create.len(),
            plan.to_delete.len()
        );

        let mut created = 0;
        let mut skipped = 0;
        let mut seen = HashSet::new();

        for instruction in &plan.to_create {
            if snapshot.knows(instruction.remote_id) || !seen.insert(instruction.remote_id) {
                tracing::warn!(
                    "Ignoring create for remote item {}: already known locally",
                    instruction.remote_id
                );
                skipped += 1;
                continue;
            }

            self.create_linked_note(instruction).await?;
            created += 1;
        }

        let mut trashed = 0;
        for instruction in &plan.to_delete {
            let moved = self
                .repo
                .soft_delete_notes_by_azure_id(instruction.remote_id)
                .await?;

            for note_id in moved {
                self.notifications
                    .record(Some(note_id), NotificationType::NoteSentToTrashBySync, false)
                    .await;
                trashed += 1;
            }
        }

        if let Some(user_id) = plan.remote_user_id.as_deref() {
            self.accounts.record_user_id(user_id).await?;
        }

        self.refresh_note_lists().await?;
        self.accounts.update_last_synced_at().await?;

        let report = SyncReport {
            trigger,
            created,
            trashed,
            skipped,
            started_at,
            completed_at: Utc::now(),
        };

        tracing::info!(
            "Sync cycle completed ({}): {} created, {} trashed, {} skipped",
            trigger,
            report.created,
            report.trashed,
            report.skipped
        );

        Ok(SyncOutcome::Completed(report))
    }

    async fn create_linked_note(&self, instruction: &CreateInstruction) -> Result<Note> {
        let base = instruction.title.trim();
        let base = if base.is_empty() {
            format!("Work item #{}", instruction.remote_id)
        } else {
            base.to_string()
        };
        let fallback = format!("{} (#{})", base, instruction.remote_id);
        let title = unique_title(&self.repo, &base, &fallback).await?;

        let note = self
            .repo
            .create_note(CreateNoteRequest {
                title,
                content: String::new(),
                azure_id: Some(instruction.remote_id),
            })
            .await?;

        self.notifications
            .record(Some(note.id), NotificationType::NoteCreatedBySync, false)
            .await;

        tracing::info!(
            "Created note {} from remote item {}",
            note.id,
            instruction.remote_id
        );
        Ok(note)
    }
}

/// Handle to the background sync loop
pub struct SyncWorker {
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Wait for the loop to exit after its token was cancelled.
    ///
    /// An in-flight cycle finishes first.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("Sync worker task failed: {}", e);
        }
    }
}

/// Run a startup cycle immediately, then one per `interval` until `cancel`
pub fn spawn_sync_worker(
    service: SyncService,
    interval: Duration,
    cancel: CancellationToken,
) -> SyncWorker {
    let handle = tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Sync worker started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut trigger = SyncTrigger::Startup;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sync worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are already logged by the cycle
                    let _ = service.run_cycle(trigger).await;
                    trigger = SyncTrigger::Timer;
                }
            }
        }
    });

    SyncWorker { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, AccountType, AuthMethod, NewThirdPartyAccount};
    use crate::error::AppError;
    use crate::remote::{DeleteInstruction, ReconciliationPlan, RemoteAuth};
    use crate::services::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Remote that replays a scripted plan and records the snapshots it saw
    #[derive(Default)]
    struct ScriptedRemote {
        plan: Mutex<ReconciliationPlan>,
        fail: AtomicBool,
        delay: Option<Duration>,
        calls: Mutex<Vec<HashSet<RemoteId>>>,
    }

    impl ScriptedRemote {
        fn set_plan(&self, plan: ReconciliationPlan) {
            *self.plan.lock().unwrap() = plan;
        }
    }

    #[async_trait]
    impl RemoteBoundary for ScriptedRemote {
        async fn fetch_reconciliation_plan(
            &self,
            active: &HashSet<RemoteId>,
            _trashed: &HashSet<RemoteId>,
            _graveyard: &HashSet<RemoteId>,
        ) -> Result<ReconciliationPlan> {
            self.calls.lock().unwrap().push(active.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::RemoteUnavailable("offline".to_string()));
            }
            Ok(self.plan.lock().unwrap().clone())
        }

        async fn is_remote_item_finished(&self, _remote_id: RemoteId) -> Result<bool> {
            Ok(false)
        }
    }

    struct NoAuth;

    #[async_trait]
    impl RemoteAuth for NoAuth {
        async fn validate_pat(&self, _org: &str, _project: &str, _pat: &str) -> Result<()> {
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
            Ok(None)
        }
    }

    fn create(remote_id: RemoteId, title: &str) -> CreateInstruction {
        CreateInstruction {
            remote_id,
            title: title.to_string(),
        }
    }

    async fn create_test_service(remote: Arc<ScriptedRemote>, linked: bool) -> (SyncService, Repository) {
        let pool = create_memory_pool().await.unwrap();

        let repo = Repository::new(pool);
        if linked {
            repo.upsert_account(
                &NewThirdPartyAccount {
                    account_type: AccountType::AzureDevops,
                    third_party_user_id: None,
                    auth_method: AuthMethod::Pat,
                    organization_name: "contoso".to_string(),
                    project_name: "notes".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        }

        let accounts = AccountService::new(
            repo.clone(),
            Arc::new(MemoryCredentialStore::default()),
            Arc::new(NoAuth),
        );
        let service = SyncService::new(
            repo.clone(),
            NotificationsService::new(repo.clone()),
            accounts,
            remote,
        );
        (service, repo)
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cycle_creates_and_trashes() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, repo) = create_test_service(remote.clone(), true).await;

        let stale = repo
            .create_note(CreateNoteRequest {
                title: "Stale".to_string(),
                azure_id: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();

        remote.set_plan(ReconciliationPlan {
            to_create: vec![create(42, "Fix bug")],
            to_delete: vec![DeleteInstruction { remote_id: 7 }],
            remote_user_id: Some("user-1".to_string()),
        });

        let report = completed(service.run_cycle(SyncTrigger::Manual).await.unwrap());
        assert_eq!((report.created, report.trashed, report.skipped), (1, 1, 0));
        assert_eq!(report.trigger, SyncTrigger::Manual);

        let active = repo.list_active_notes().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Fix bug");
        assert_eq!(active[0].azure_id, Some(42));
        assert!(repo.get_note(stale.id).await.unwrap().soft_deleted);

        let created = repo.list_notifications_for_note(active[0].id).await.unwrap();
        assert_eq!(created[0].notification_type, NotificationType::NoteCreatedBySync);
        let trashed = repo.list_notifications_for_note(stale.id).await.unwrap();
        assert_eq!(trashed[0].notification_type, NotificationType::NoteSentToTrashBySync);

        let account = repo.get_account().await.unwrap().unwrap();
        assert_eq!(account.third_party_user_id.as_deref(), Some("user-1"));
        assert!(account.last_synced_at.is_some());

        let lists = service.note_lists().await;
        assert_eq!(lists.active.len(), 1);
        assert_eq!(lists.trashed.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_plan_is_idempotent() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, repo) = create_test_service(remote.clone(), true).await;

        repo.create_note(CreateNoteRequest {
            title: "Closed".to_string(),
            azure_id: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();

        remote.set_plan(ReconciliationPlan {
            to_create: vec![create(42, "Fix bug")],
            to_delete: vec![DeleteInstruction { remote_id: 7 }],
            remote_user_id: None,
        });

        service.run_cycle(SyncTrigger::Timer).await.unwrap();
        let second = completed(service.run_cycle(SyncTrigger::Timer).await.unwrap());

        assert_eq!((second.created, second.trashed, second.skipped), (0, 0, 1));
        assert_eq!(repo.list_notes().await.unwrap().len(), 2);
        assert_eq!(repo.list_notifications().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_graveyarded_and_duplicate_creates_are_skipped() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, repo) = create_test_service(remote.clone(), true).await;
        repo.add_to_graveyard(42).await.unwrap();

        remote.set_plan(ReconciliationPlan {
            to_create: vec![create(42, "Purged"), create(5, "New"), create(5, "New again")],
            ..Default::default()
        });

        let report = completed(service.run_cycle(SyncTrigger::Manual).await.unwrap());
        assert_eq!((report.created, report.skipped), (1, 2));

        let notes = repo.list_notes().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].azure_id, Some(5));
    }

    #[tokio::test]
    async fn test_sync_titles_stay_unique() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, repo) = create_test_service(remote.clone(), true).await;

        repo.create_note(CreateNoteRequest {
            title: "Sprint Plan".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        remote.set_plan(ReconciliationPlan {
            to_create: vec![create(10, "Sprint Plan"), create(11, "  ")],
            ..Default::default()
        });
        service.run_cycle(SyncTrigger::Manual).await.unwrap();

        let titles: HashSet<String> = repo
            .list_active_notes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert!(titles.contains("Sprint Plan"));
        assert!(titles.contains("Sprint Plan (#10)"));
        assert!(titles.contains("Work item #11"));
    }

    #[tokio::test]
    async fn test_no_account_skips_cycle() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, _) = create_test_service(remote.clone(), false).await;

        let outcome = service.run_cycle(SyncTrigger::Startup).await.unwrap();
        assert_eq!(outcome, SyncOutcome::NoAccount);
        assert!(remote.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_is_returned_and_releases_latch() {
        let remote = Arc::new(ScriptedRemote::default());
        remote.fail.store(true, Ordering::SeqCst);
        let (service, repo) = create_test_service(remote.clone(), true).await;

        let err = service.run_cycle(SyncTrigger::Manual).await.unwrap_err();
        assert!(err.is_remote());
        assert!(!service.is_running());

        let account = repo.get_account().await.unwrap().unwrap();
        assert!(account.last_synced_at.is_none());

        remote.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            service.run_cycle(SyncTrigger::Manual).await.unwrap(),
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_dropped() {
        let remote = Arc::new(ScriptedRemote {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let (service, _) = create_test_service(remote.clone(), true).await;

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.run_cycle(SyncTrigger::Timer).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.is_running());
        let second = service.run_cycle(SyncTrigger::Manual).await.unwrap();
        assert_eq!(second, SyncOutcome::AlreadyRunning);

        assert!(matches!(
            first.await.unwrap().unwrap(),
            SyncOutcome::Completed(_)
        ));
        assert_eq!(remote.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_worker_runs_startup_cycle_and_stops() {
        let remote = Arc::new(ScriptedRemote::default());
        let (service, repo) = create_test_service(remote.clone(), true).await;

        let cancel = CancellationToken::new();
        let worker = spawn_sync_worker(service, Duration::from_secs(3600), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        worker.join().await;

        assert_eq!(remote.calls.lock().unwrap().len(), 1);
        assert!(repo.get_account().await.unwrap().unwrap().last_synced_at.is_some());
    }
}
