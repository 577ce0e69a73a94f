//! Secure persistence for the single credential record
//!
//! The record lives in the OS keychain (macOS Keychain, Windows Credential
//! Manager, Secret Service on Linux) under a fixed service/account pair.

use async_trait::async_trait;
use thiserror::Error;

use super::tokens::Credential;

/// Keychain service name.
pub const VAULT_SERVICE: &str = "fabric-cli";
/// Keychain account name. There is only ever one record.
pub const VAULT_ACCOUNT: &str = "session";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("credential vault error ({code}): {message}")]
    Platform { code: &'static str, message: String },
    #[error("stored credential is unreadable: {0}")]
    Corrupt(String),
}

/// Storage for exactly one serialized `Credential`.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Replace any existing record; fields are never merged.
    async fn save(&self, credential: &Credential) -> Result<(), VaultError>;
    /// `Ok(None)` when nothing is stored.
    async fn read(&self) -> Result<Option<Credential>, VaultError>;
    /// Idempotent; clearing an empty vault succeeds.
    async fn clear(&self) -> Result<(), VaultError>;
}

fn encode(credential: &Credential) -> Result<String, VaultError> {
    serde_json::to_string(credential).map_err(|e| VaultError::Corrupt(e.to_string()))
}

fn decode(data: &str) -> Result<Credential, VaultError> {
    serde_json::from_str(data).map_err(|e| VaultError::Corrupt(e.to_string()))
}

/// Keyring-backed vault.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
    account: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(service, account).map_err(platform_error)
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new(VAULT_SERVICE, VAULT_ACCOUNT)
    }
}

fn platform_error(e: keyring::Error) -> VaultError {
    let code = match &e {
        keyring::Error::PlatformFailure(_) => "platform-failure",
        keyring::Error::NoStorageAccess(_) => "no-storage-access",
        keyring::Error::NoEntry => "no-entry",
        keyring::Error::BadEncoding(_) => "bad-encoding",
        keyring::Error::TooLong(_, _) => "too-long",
        keyring::Error::Invalid(_, _) => "invalid",
        keyring::Error::Ambiguous(_) => "ambiguous",
        _ => "unknown",
    };
    VaultError::Platform {
        code,
        message: e.to_string(),
    }
}

fn join_error(e: tokio::task::JoinError) -> VaultError {
    VaultError::Platform {
        code: "task",
        message: e.to_string(),
    }
}

#[async_trait]
impl CredentialVault for KeyringVault {
    async fn save(&self, credential: &Credential) -> Result<(), VaultError> {
        let data = encode(credential)?;
        let (service, account) = (self.service.clone(), self.account.clone());

        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            // Delete-then-insert: the new record fully replaces the old one
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(platform_error(e)),
            }
            entry.set_password(&data).map_err(platform_error)
        })
        .await
        .map_err(join_error)??;

        tracing::debug!(service = %self.service, "Credential saved to keychain");
        Ok(())
    }

    async fn read(&self) -> Result<Option<Credential>, VaultError> {
        let (service, account) = (self.service.clone(), self.account.clone());

        let data = tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.get_password() {
                Ok(data) => Ok(Some(data)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(platform_error(e)),
            }
        })
        .await
        .map_err(join_error)??;

        data.as_deref().map(decode).transpose()
    }

    async fn clear(&self) -> Result<(), VaultError> {
        let (service, account) = (self.service.clone(), self.account.clone());

        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(platform_error(e)),
            }
        })
        .await
        .map_err(join_error)??;

        tracing::debug!(service = %self.service, "Credential cleared from keychain");
        Ok(())
    }
}

/// In-process vault holding the serialized record, used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryVault {
    slot: std::sync::Mutex<Option<String>>,
    pub fail_reads: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryVault {
    /// Raw serialized bytes currently stored.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CredentialVault for MemoryVault {
    async fn save(&self, credential: &Credential) -> Result<(), VaultError> {
        let data = encode(credential)?;
        let mut slot = self.slot.lock().unwrap();
        slot.take();
        *slot = Some(data);
        Ok(())
    }

    async fn read(&self) -> Result<Option<Credential>, VaultError> {
        if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(VaultError::Platform {
                code: "no-storage-access",
                message: "locked".to_string(),
            });
        }
        self.slot.lock().unwrap().as_deref().map(decode).transpose()
    }

    async fn clear(&self) -> Result<(), VaultError> {
        self.slot.lock().unwrap().take();
        Ok(())
    }
}
