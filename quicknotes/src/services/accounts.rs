//! Account manager
//!
//! Owns the single linked third-party account. Replacing an existing
//! account, or changing its auth method, is a two-phase operation: `set`
//! reports that confirmation is needed and the caller re-enters through
//! `apply_confirmed_overwrite` once the user has agreed.

use crate::database::{
    AccountType, AuthMethod, NewThirdPartyAccount, Repository, ThirdPartyAccount,
};
use crate::error::Result;
use crate::remote::RemoteAuth;
use crate::services::CredentialStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Why an account change needs the user's consent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConfirmationReason {
    ChangeAuthMethod { from: AuthMethod, to: AuthMethod },
    ReplaceAccount,
}

/// A deferred account change awaiting the user's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingConfirmation {
    pub reason: ConfirmationReason,
    pub current: ThirdPartyAccountSummary,
    pub pending: NewThirdPartyAccount,
}

impl PendingConfirmation {
    pub fn title(&self) -> &'static str {
        match self.reason {
            ConfirmationReason::ChangeAuthMethod { .. } => "Override Authentication Type",
            ConfirmationReason::ReplaceAccount => "Override Synced Account",
        }
    }

    pub fn message(&self) -> String {
        let user = self.current.third_party_user_id.as_deref().unwrap_or("unknown");
        match &self.reason {
            ConfirmationReason::ChangeAuthMethod { from, to } => format!(
                "This Azure DevOps account connection with user {} already exists. \
                 Replace its auth type {} with {}?",
                user, from, to
            ),
            ConfirmationReason::ReplaceAccount => format!(
                "An Azure DevOps account connection with user {} currently exists. \
                 Replace it with user {} using auth type {}?",
                user,
                self.pending.third_party_user_id.as_deref().unwrap_or("unknown"),
                self.pending.auth_method
            ),
        }
    }
}

/// Identity fields of the current account shown in a confirmation prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThirdPartyAccountSummary {
    pub account_type: AccountType,
    pub third_party_user_id: Option<String>,
    pub auth_method: AuthMethod,
}

impl From<&ThirdPartyAccount> for ThirdPartyAccountSummary {
    fn from(account: &ThirdPartyAccount) -> Self {
        Self {
            account_type: account.account_type,
            third_party_user_id: account.third_party_user_id.clone(),
            auth_method: account.auth_method,
        }
    }
}

/// Result of asking to link an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccountDecision {
    Applied,
    NeedsConfirmation(PendingConfirmation),
}

/// Secret supplied when linking an account
#[derive(Clone)]
pub enum AccountCredential {
    Pat(String),
    OAuthToken(String),
}

impl AccountCredential {
    pub fn auth_method(&self) -> AuthMethod {
        match self {
            AccountCredential::Pat(_) => AuthMethod::Pat,
            AccountCredential::OAuthToken(_) => AuthMethod::OAuth,
        }
    }

    fn secret(&self) -> &str {
        match self {
            AccountCredential::Pat(secret) | AccountCredential::OAuthToken(secret) => secret,
        }
    }
}

impl std::fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountCredential({}, <redacted>)", self.auth_method())
    }
}

#[derive(Clone)]
pub struct AccountService {
    repo: Repository,
    credentials: Arc<dyn CredentialStore>,
    auth: Arc<dyn RemoteAuth>,
}

impl AccountService {
    pub fn new(
        repo: Repository,
        credentials: Arc<dyn CredentialStore>,
        auth: Arc<dyn RemoteAuth>,
    ) -> Self {
        Self {
            repo,
            credentials,
            auth,
        }
    }

    pub async fn get(&self) -> Result<Option<ThirdPartyAccount>> {
        self.repo.get_account().await
    }

    /// Link `account`, or report what the user must confirm first
    pub async fn set(&self, account: &NewThirdPartyAccount) -> Result<AccountDecision> {
        let Some(current) = self.repo.get_account().await? else {
            self.repo.upsert_account(account, None).await?;
            tracing::info!("Linked {:?} account ({})", account.account_type, account.auth_method);
            return Ok(AccountDecision::Applied);
        };

        let same_identity = current.account_type == account.account_type
            && current.third_party_user_id == account.third_party_user_id;

        if same_identity && current.auth_method == account.auth_method {
            // Same account and credential kind: nothing to change, the
            // caller may still rotate the secret itself.
            tracing::debug!("Account already linked, nothing to update");
            return Ok(AccountDecision::Applied);
        }

        let reason = if same_identity {
            ConfirmationReason::ChangeAuthMethod {
                from: current.auth_method,
                to: account.auth_method,
            }
        } else {
            ConfirmationReason::ReplaceAccount
        };

        tracing::info!("Account change needs confirmation: {:?}", reason);

        Ok(AccountDecision::NeedsConfirmation(PendingConfirmation {
            reason,
            current: ThirdPartyAccountSummary::from(&current),
            pending: account.clone(),
        }))
    }

    /// Overwrite the linked account after the user confirmed
    pub async fn apply_confirmed_overwrite(
        &self,
        account: &NewThirdPartyAccount,
    ) -> Result<ThirdPartyAccount> {
        // Sync history only carries over when the remote identity is unchanged
        let last_synced_at = self
            .repo
            .get_account()
            .await?
            .filter(|current| {
                current.account_type == account.account_type
                    && current.third_party_user_id == account.third_party_user_id
            })
            .and_then(|current| current.last_synced_at);

        let saved = self.repo.upsert_account(account, last_synced_at).await?;

        tracing::info!("Linked account overwritten ({})", saved.auth_method);
        Ok(saved)
    }

    /// Stamp the account's last sync time and return it.
    ///
    /// Returns `None` when no account is linked.
    pub async fn update_last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        let now = Utc::now();

        if self.repo.set_account_last_synced_at(now).await? {
            Ok(Some(now))
        } else {
            Ok(None)
        }
    }

    /// Point the linked account at another organization/project
    pub async fn set_project(
        &self,
        organization_name: &str,
        project_name: &str,
    ) -> Result<Option<ThirdPartyAccount>> {
        self.repo
            .update_account_project(organization_name.trim(), project_name.trim())
            .await
    }

    /// Remember the remote user id learned from a successful query
    pub async fn record_user_id(&self, user_id: &str) -> Result<bool> {
        let recorded = self.repo.set_account_user_id_if_missing(user_id).await?;
        if recorded {
            tracing::info!("Recorded remote user id for linked account");
        }
        Ok(recorded)
    }

    pub async fn delete(&self) -> Result<bool> {
        self.repo.delete_account().await
    }

    /// Run the interactive OAuth sign-in
    pub async fn sign_in_with_oauth(&self) -> Result<AccountCredential> {
        let token = self.auth.obtain_oauth_token().await?;
        Ok(AccountCredential::OAuthToken(token))
    }

    /// Link an Azure DevOps account with the given credential.
    ///
    /// PATs are validated against the project first. On `Applied` the
    /// credential is stored; on `NeedsConfirmation` nothing is written and
    /// the caller finishes with [`confirm_connect`](Self::confirm_connect).
    pub async fn connect(
        &self,
        organization_name: &str,
        project_name: &str,
        credential: AccountCredential,
    ) -> Result<AccountDecision> {
        let organization_name = organization_name.trim();
        let project_name = project_name.trim();

        if let AccountCredential::Pat(pat) = &credential {
            self.auth
                .validate_pat(organization_name, project_name, pat)
                .await?;
        }

        let third_party_user_id = match self
            .auth
            .lookup_user_id(organization_name, credential.auth_method(), credential.secret())
            .await
        {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!("Could not determine remote user id: {}", e);
                None
            }
        };

        let account = NewThirdPartyAccount {
            account_type: AccountType::AzureDevops,
            third_party_user_id,
            auth_method: credential.auth_method(),
            organization_name: organization_name.to_string(),
            project_name: project_name.to_string(),
        };

        let decision = self.set(&account).await?;

        if decision == AccountDecision::Applied {
            self.set_project(organization_name, project_name).await?;
            self.credentials.store_credential(credential.secret())?;
        }

        Ok(decision)
    }

    /// Finish a connect that needed confirmation
    pub async fn confirm_connect(
        &self,
        pending: &NewThirdPartyAccount,
        credential: AccountCredential,
    ) -> Result<ThirdPartyAccount> {
        let account = self.apply_confirmed_overwrite(pending).await?;
        self.credentials.store_credential(credential.secret())?;
        Ok(account)
    }

    /// Unlink the account and forget its credential
    pub async fn disconnect(&self) -> Result<()> {
        self.repo.delete_account().await?;
        self.credentials.delete_credential()?;
        tracing::info!("Azure DevOps account disconnected");
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        self.credentials.has_credential()
    }
}
