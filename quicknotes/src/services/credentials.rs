/// Credential storage
/// Keeps the Azure DevOps PAT or OAuth access token out of the database,
/// in the OS credential store.
use crate::config::{KEYRING_CREDENTIAL_ENTRY, KEYRING_SERVICE};
use crate::error::{AppError, Result};
use keyring::Entry;
use std::sync::Mutex;

/// Secret storage for the linked account's credential
pub trait CredentialStore: Send + Sync {
    fn has_credential(&self) -> bool;

    fn get_credential(&self) -> Result<Option<String>>;

    fn store_credential(&self, secret: &str) -> Result<()>;

    /// Remove the stored secret. Deleting a missing secret is not an error.
    fn delete_credential(&self) -> Result<()>;
}

/// OS keyring backed credential store
pub struct KeyringCredentialStore {
    service: String,
    entry_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entry_name: entry_name.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry_name)
            .map_err(|e| AppError::Credential(format!("Failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_CREDENTIAL_ENTRY)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn has_credential(&self) -> bool {
        matches!(self.get_credential(), Ok(Some(_)))
    }

    fn get_credential(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::Credential(format!(
                "Failed to read credential: {}",
                e
            ))),
        }
    }

    fn store_credential(&self, secret: &str) -> Result<()> {
        self.entry()?
            .set_password(secret)
            .map_err(|e| AppError::Credential(format!("Failed to store credential: {}", e)))?;

        tracing::info!("Credential stored in OS credential manager");
        Ok(())
    }

    fn delete_credential(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::info!("Credential deleted from OS credential manager");
                Ok(())
            }
            Err(e) => Err(AppError::Credential(format!(
                "Failed to delete credential: {}",
                e
            ))),
        }
    }
}

/// Process-local credential store for tests and keyring-less hosts
#[derive(Default)]
pub struct MemoryCredentialStore {
    secret: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Mutex::new(Some(secret.into())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.secret
            .lock()
            .map_err(|_| AppError::Credential("Credential store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn has_credential(&self) -> bool {
        matches!(self.get_credential(), Ok(Some(_)))
    }

    fn get_credential(&self) -> Result<Option<String>> {
        Ok(self.lock()?.clone())
    }

    fn store_credential(&self, secret: &str) -> Result<()> {
        *self.lock()? = Some(secret.to_string());
        Ok(())
    }

    fn delete_credential(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}
