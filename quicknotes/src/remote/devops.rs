//! Azure DevOps implementation of the remote boundary
//!
//! Work items assigned to the authenticated user are found with a WIQL
//! query, then fetched in batches. Organization, project and credential
//! kind come from the linked account; the secret itself from the
//! credential store.

use super::{compute_plan, RemoteAuth, RemoteBoundary, RemoteWorkItem, ReconciliationPlan};
use crate::config::{
    ASSIGNED_WORK_ITEMS_WIQL, DEVOPS_API_VERSION, DEVOPS_BATCH_SIZE, DEVOPS_REQUEST_TIMEOUT,
};
use crate::database::{AuthMethod, RemoteId, Repository};
use crate::error::{AppError, Result};
use crate::services::CredentialStore;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const FIELD_ID: &str = "System.Id";
const FIELD_TITLE: &str = "System.Title";
const FIELD_WORK_ITEM_TYPE: &str = "System.WorkItemType";
const FIELD_CLOSED_DATE: &str = "Microsoft.VSTS.Common.ClosedDate";
const FIELD_ASSIGNED_TO: &str = "System.AssignedTo";

#[derive(Deserialize)]
struct WiqlWorkItem {
    id: RemoteId,
}

#[derive(Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems")]
    work_items: Vec<WiqlWorkItem>,
}

#[derive(Serialize)]
struct WiqlRequest<'a> {
    query: &'a str,
}

#[derive(Serialize)]
struct WorkItemsBatchRequest<'a> {
    ids: &'a [RemoteId],
    fields: [&'static str; 5],
}

#[derive(Deserialize)]
struct ConnectionData {
    #[serde(rename = "authenticatedUser")]
    authenticated_user: Option<AuthenticatedUser>,
}

#[derive(Deserialize)]
struct AuthenticatedUser {
    id: Option<String>,
}

#[derive(Deserialize)]
struct WorkItemsResponse {
    value: Vec<DevOpsWorkItem>,
}

#[derive(Debug, Deserialize)]
pub struct DevOpsWorkItem {
    pub id: RemoteId,
    pub fields: DevOpsFields,
}

#[derive(Debug, Deserialize)]
pub struct DevOpsFields {
    #[serde(rename = "System.Title", default)]
    pub title: String,

    #[serde(rename = "Microsoft.VSTS.Common.ClosedDate", default)]
    pub closed_date: Option<String>,

    #[serde(rename = "System.AssignedTo", default)]
    pub assigned_to: Option<DevOpsIdentity>,
}

#[derive(Debug, Deserialize)]
pub struct DevOpsIdentity {
    #[serde(rename = "uniqueName")]
    pub unique_name: Option<String>,
    pub id: Option<String>,
}

impl From<&DevOpsWorkItem> for RemoteWorkItem {
    fn from(item: &DevOpsWorkItem) -> Self {
        RemoteWorkItem {
            id: item.id,
            title: item.fields.title.clone(),
            closed: item.fields.closed_date.is_some(),
        }
    }
}

/// Organization, project and authorization header for one request burst
struct Target {
    organization: String,
    project: String,
    authorization: String,
}

/// Build the Basic auth header for a PAT
pub fn basic_auth_header_for_pat(pat: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!(":{}", pat).as_bytes());
    format!("Basic {}", encoded)
}

fn bearer_auth_header(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Azure DevOps REST client
#[derive(Clone)]
pub struct DevOpsClient {
    http: Client,
    base_url: String,
    repo: Repository,
    credentials: Arc<dyn CredentialStore>,
}

impl DevOpsClient {
    pub fn new(
        base_url: impl Into<String>,
        repo: Repository,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(DEVOPS_REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            repo,
            credentials,
        })
    }

    /// Resolve the linked account and its credential
    async fn target(&self) -> Result<Target> {
        let account = self
            .repo
            .get_account()
            .await?
            .ok_or_else(|| AppError::NotConfigured("No Azure DevOps account linked".to_string()))?;

        if account.organization_name.is_empty() || account.project_name.is_empty() {
            return Err(AppError::NotConfigured(
                "Azure DevOps organization and project must be set".to_string(),
            ));
        }

        let secret = self
            .credentials
            .get_credential()?
            .ok_or_else(|| AppError::NotConfigured("No Azure DevOps credential stored".to_string()))?;

        let authorization = match account.auth_method {
            AuthMethod::Pat => basic_auth_header_for_pat(&secret),
            AuthMethod::OAuth => bearer_auth_header(&secret),
        };

        Ok(Target {
            organization: account.organization_name,
            project: account.project_name,
            authorization,
        })
    }

    fn endpoint(&self, organization: &str, project: &str, path: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::NotConfigured(format!("Invalid DevOps base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| AppError::NotConfigured("DevOps base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push(organization)
            .push(project)
            .push("_apis")
            .push("wit")
            .extend(path);

        url.query_pairs_mut()
            .append_pair("api-version", DEVOPS_API_VERSION);

        Ok(url)
    }

    /// Run a WIQL query and return the matching work item ids
    async fn run_wiql(
        &self,
        organization: &str,
        project: &str,
        authorization: &str,
        wiql: &str,
    ) -> Result<Vec<RemoteId>> {
        let url = self.endpoint(organization, project, &["wiql"])?;

        let response = self
            .http
            .post(url)
            .header("Authorization", authorization)
            .json(&WiqlRequest { query: wiql })
            .send()
            .await?;

        let body: WiqlResponse = check_status(response).await?.json().await?;

        Ok(body.work_items.into_iter().map(|w| w.id).collect())
    }

    /// Fetch work item fields, batching to the API's id limit
    async fn fetch_work_items(&self, target: &Target, ids: &[RemoteId]) -> Result<Vec<DevOpsWorkItem>> {
        let mut items = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(DEVOPS_BATCH_SIZE) {
            let url = self.endpoint(&target.organization, &target.project, &["workitemsbatch"])?;

            let response = self
                .http
                .post(url)
                .header("Authorization", &target.authorization)
                .json(&WorkItemsBatchRequest {
                    ids: chunk,
                    fields: [
                        FIELD_ID,
                        FIELD_TITLE,
                        FIELD_WORK_ITEM_TYPE,
                        FIELD_CLOSED_DATE,
                        FIELD_ASSIGNED_TO,
                    ],
                })
                .send()
                .await?;

            let body: WorkItemsResponse = check_status(response).await?.json().await?;
            items.extend(body.value);
        }

        Ok(items)
    }

    /// All work items assigned to the authenticated user
    pub async fn assigned_work_items(&self) -> Result<Vec<DevOpsWorkItem>> {
        let target = self.target().await?;

        let ids = self
            .run_wiql(
                &target.organization,
                &target.project,
                &target.authorization,
                ASSIGNED_WORK_ITEMS_WIQL,
            )
            .await?;

        tracing::debug!("WIQL returned {} assigned work item(s)", ids.len());

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.fetch_work_items(&target, &ids).await
    }
}

/// Map DevOps status codes onto the error taxonomy
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();

    // 203 is how DevOps answers an unauthorized PAT with a sign-in page
    if status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
        return Err(AppError::Auth(
            "Credential does not have permission (203)".to_string(),
        ));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AppError::Auth(format!(
            "Azure DevOps rejected the credential: {}",
            status
        )));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::RemoteUnavailable(format!(
            "Azure DevOps returned an error status: {} {}",
            status, body
        )));
    }

    Ok(response)
}

#[async_trait]
impl RemoteBoundary for DevOpsClient {
    async fn fetch_reconciliation_plan(
        &self,
        active_remote_ids: &HashSet<RemoteId>,
        trashed_remote_ids: &HashSet<RemoteId>,
        graveyard_ids: &HashSet<RemoteId>,
    ) -> Result<ReconciliationPlan> {
        let work_items = self.assigned_work_items().await?;

        let items: Vec<RemoteWorkItem> = work_items.iter().map(RemoteWorkItem::from).collect();
        let mut plan = compute_plan(&items, active_remote_ids, trashed_remote_ids, graveyard_ids);

        plan.remote_user_id = work_items
            .iter()
            .filter_map(|w| w.fields.assigned_to.as_ref())
            .find_map(|who| who.id.clone().or_else(|| who.unique_name.clone()));

        Ok(plan)
    }

    async fn is_remote_item_finished(&self, remote_id: RemoteId) -> Result<bool> {
        let target = self.target().await?;

        let id = remote_id.to_string();
        let mut url = self.endpoint(&target.organization, &target.project, &["workitems", &id])?;
        url.query_pairs_mut().append_pair("fields", FIELD_CLOSED_DATE);

        let response = self
            .http
            .get(url)
            .header("Authorization", &target.authorization)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Remote item {} no longer exists", remote_id);
            return Ok(true);
        }

        let item: DevOpsWorkItem = check_status(response).await?.json().await?;
        Ok(item.fields.closed_date.is_some())
    }
}

#[async_trait]
impl RemoteAuth for DevOpsClient {
    async fn validate_pat(&self, organization: &str, project: &str, pat: &str) -> Result<()> {
        if pat.trim().is_empty() {
            return Err(AppError::Credential("PAT cannot be empty".to_string()));
        }

        // Work item reads are the only scope we require, so a cheap WIQL
        // query doubles as the permission check.
        self.run_wiql(
            organization,
            project,
            &basic_auth_header_for_pat(pat),
            "Select [System.Id] From WorkItems",
        )
        .await
        .map(|_| ())
    }

    async fn obtain_oauth_token(&self) -> Result<String> {
        super::obtain_oauth_token().await
    }

    async fn lookup_user_id(
        &self,
        organization: &str,
        auth_method: AuthMethod,
        secret: &str,
    ) -> Result<Option<String>> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::NotConfigured(format!("Invalid DevOps base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::NotConfigured("DevOps base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(&[organization, "_apis", "connectionData"]);

        let authorization = match auth_method {
            AuthMethod::Pat => basic_auth_header_for_pat(secret),
            AuthMethod::OAuth => bearer_auth_header(secret),
        };

        let response = self
            .http
            .get(url)
            .header("Authorization", authorization)
            .send()
            .await?;

        let data: ConnectionData = check_status(response).await?.json().await?;
        Ok(data.authenticated_user.and_then(|user| user.id))
    }
}
