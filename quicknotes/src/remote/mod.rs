//! Remote work item boundary
//!
//! The reconciliation engine only sees the remote system through
//! [`RemoteBoundary`]. `devops` implements it against the Azure DevOps
//! REST API; `oauth` obtains access tokens for the OAuth credential kind.

pub mod devops;
pub mod oauth;

pub use devops::DevOpsClient;
pub use oauth::obtain_oauth_token;

use crate::database::{AuthMethod, RemoteId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Remote item that has no local note yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstruction {
    pub remote_id: RemoteId,
    pub title: String,
}

/// Remote item whose local notes should be trashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInstruction {
    pub remote_id: RemoteId,
}

/// What one reconciliation cycle should apply locally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub to_create: Vec<CreateInstruction>,
    pub to_delete: Vec<DeleteInstruction>,
    /// Remote identity of the authenticated user, when the remote reports it
    pub remote_user_id: Option<String>,
}

/// Work item as seen by the plan computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkItem {
    pub id: RemoteId,
    pub title: String,
    /// Closed items are finished
    pub closed: bool,
}

#[async_trait]
pub trait RemoteBoundary: Send + Sync {
    /// Classify remote items against the local snapshots
    async fn fetch_reconciliation_plan(
        &self,
        active_remote_ids: &HashSet<RemoteId>,
        trashed_remote_ids: &HashSet<RemoteId>,
        graveyard_ids: &HashSet<RemoteId>,
    ) -> Result<ReconciliationPlan>;

    /// Whether the remote item is closed or gone
    async fn is_remote_item_finished(&self, remote_id: RemoteId) -> Result<bool>;
}

/// Credential checks against the remote system, used when linking an account
#[async_trait]
pub trait RemoteAuth: Send + Sync {
    /// Fail unless `pat` can read work items in the given project
    async fn validate_pat(&self, organization: &str, project: &str, pat: &str) -> Result<()>;

    /// Run the interactive OAuth sign-in and return an access token
    async fn obtain_oauth_token(&self) -> Result<String>;

    /// Remote identity behind a credential, if the remote exposes it
    async fn lookup_user_id(
        &self,
        organization: &str,
        auth_method: AuthMethod,
        secret: &str,
    ) -> Result<Option<String>>;
}

/// Compute a plan from the current remote item set.
///
/// Open items with no local note (active, trashed or graveyarded) are
/// created. Active notes whose item closed or disappeared are trashed.
pub fn compute_plan(
    items: &[RemoteWorkItem],
    active_remote_ids: &HashSet<RemoteId>,
    trashed_remote_ids: &HashSet<RemoteId>,
    graveyard_ids: &HashSet<RemoteId>,
) -> ReconciliationPlan {
    let remote_ids: HashSet<RemoteId> = items.iter().map(|item| item.id).collect();

    let to_create = items
        .iter()
        .filter(|item| {
            !item.closed
                && !active_remote_ids.contains(&item.id)
                && !trashed_remote_ids.contains(&item.id)
                && !graveyard_ids.contains(&item.id)
        })
        .map(|item| CreateInstruction {
            remote_id: item.id,
            title: item.title.clone(),
        })
        .collect();

    let closed_ids: HashSet<RemoteId> = items
        .iter()
        .filter(|item| item.closed)
        .map(|item| item.id)
        .collect();

    let mut to_delete: Vec<DeleteInstruction> = active_remote_ids
        .iter()
        .filter(|id| closed_ids.contains(id) || !remote_ids.contains(id))
        .map(|id| DeleteInstruction { remote_id: *id })
        .collect();
    to_delete.sort_by_key(|instruction| instruction.remote_id);

    ReconciliationPlan {
        to_create,
        to_delete,
        remote_user_id: None,
    }
}
