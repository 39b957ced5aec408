//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::config::{AppConfig, TRASH_SWEEP_INTERVAL};
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::remote::DevOpsClient;
use crate::services::{
    spawn_sync_worker, spawn_trash_sweeper, AccountService, AutoSaver, CredentialStore,
    KeyringCredentialStore, NotesService, NotificationsService, SyncService, SyncWorker,
    TrashSweeper,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repo: Repository,
    pub notes: NotesService,
    pub notifications: NotificationsService,
    pub accounts: AccountService,
    pub sync: SyncService,
    pub auto_saver: AutoSaver,
    pub trash: TrashSweeper,
    cancel: CancellationToken,
}

/// Running background loops
pub struct BackgroundTasks {
    sync: SyncWorker,
    trash: JoinHandle<()>,
}

impl AppState {
    /// Open the database and wire every service against the OS keyring
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        Self::with_credentials(config, Arc::new(KeyringCredentialStore::default())).await
    }

    pub async fn with_credentials(
        config: AppConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("Data directory: {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;

        let pool = create_pool(&config.database_path()).await?;
        let repo = Repository::new(pool);

        let devops = Arc::new(DevOpsClient::new(
            config.devops_base_url.clone(),
            repo.clone(),
            credentials.clone(),
        )?);

        let notifications = NotificationsService::new(repo.clone());
        let notes = NotesService::new(repo.clone(), notifications.clone(), devops.clone());
        let accounts = AccountService::new(repo.clone(), credentials, devops.clone());
        let sync = SyncService::new(
            repo.clone(),
            notifications.clone(),
            accounts.clone(),
            devops,
        );
        let auto_saver = AutoSaver::new(notes.clone(), config.auto_save_debounce);
        let trash = TrashSweeper::new(
            repo.clone(),
            notes.clone(),
            notifications.clone(),
            config.trash_retention_days,
        );

        sync.refresh_note_lists().await?;

        tracing::info!("Application initialized successfully");

        Ok(Self {
            config,
            repo,
            notes,
            notifications,
            accounts,
            sync,
            auto_saver,
            trash,
            cancel: CancellationToken::new(),
        })
    }

    /// Start the sync worker and the trash retention sweep
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let sync = spawn_sync_worker(
            self.sync.clone(),
            self.config.sync_interval,
            self.cancel.child_token(),
        );
        let trash = spawn_trash_sweeper(
            self.trash.clone(),
            TRASH_SWEEP_INTERVAL,
            self.cancel.child_token(),
        );

        BackgroundTasks { sync, trash }
    }

    /// Stop background loops and write pending edits.
    ///
    /// A sync cycle already in flight is allowed to finish.
    pub async fn shutdown(&self, tasks: BackgroundTasks) {
        tracing::info!("Shutting down");

        self.cancel.cancel();
        tasks.sync.join().await;
        if let Err(e) = tasks.trash.await {
            tracing::error!("Trash retention task failed: {}", e);
        }

        self.auto_saver.flush().await;
        self.repo.close().await;

        tracing::info!("Shutdown complete");
    }
}
