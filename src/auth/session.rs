//! Credential state machine: cache, silent refresh, interactive sign-in

use std::sync::Arc;

use tokio::sync::Mutex;

use super::browser::AuthorizationSurface;
use super::oauth::{AuthError, AuthorizationFlow};
use super::tokens::Credential;
use super::vault::{CredentialVault, VaultError};
use crate::config::Configuration;

/// Owns the persisted credential and decides when it can be used.
pub struct SessionManager {
    flow: AuthorizationFlow,
    vault: Arc<dyn CredentialVault>,
    surface: Arc<dyn AuthorizationSurface>,
    /// Held for the whole interactive attempt.
    interactive: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        flow: AuthorizationFlow,
        vault: Arc<dyn CredentialVault>,
        surface: Arc<dyn AuthorizationSurface>,
    ) -> Self {
        Self {
            flow,
            vault,
            surface,
            interactive: Mutex::new(()),
        }
    }

    /// The stored credential, whatever its state.
    pub async fn stored(&self) -> Result<Option<Credential>, VaultError> {
        self.vault.read().await
    }

    /// A credential usable for `config` right now, refreshing silently at
    /// most once. `Ok(None)` means the caller has to sign in again; nothing
    /// is cleared here.
    pub async fn valid_access_token(
        &self,
        config: &Configuration,
    ) -> Result<Option<Credential>, VaultError> {
        let cached = match self.vault.read().await? {
            Some(cred) if cred.matches(config) => cred,
            Some(_) => {
                tracing::debug!("Stored credential belongs to another tenant/client");
                return Ok(None);
            }
            None => return Ok(None),
        };

        if !cached.is_near_expiry() {
            return Ok(Some(cached));
        }

        let Some(refresh_token) = cached.refresh_token.clone() else {
            tracing::debug!("No refresh token; silent refresh unavailable");
            return Ok((!cached.is_expired()).then_some(cached));
        };

        tracing::info!(
            "Access token {}, refreshing",
            if cached.is_expired() { "expired" } else { "near expiry" }
        );
        match self.flow.refresh_access_token(config, &refresh_token).await {
            Ok(fresh) => {
                self.vault.save(&fresh).await?;
                Ok(Some(fresh))
            }
            Err(e) => {
                tracing::warn!("Silent refresh failed: {}", e);
                Ok((!cached.is_expired()).then_some(cached))
            }
        }
    }

    /// Interactive sign-in. Only one may be in flight; overlapping calls are
    /// rejected with `AlreadyInProgress` instead of opening a second surface.
    pub async fn authenticate(&self, config: &Configuration) -> Result<Credential, AuthError> {
        let _guard = self
            .interactive
            .try_lock()
            .map_err(|_| AuthError::AlreadyInProgress)?;

        config.ensure_complete()?;
        let authorization = self
            .flow
            .request_authorization_code(config, self.surface.as_ref())
            .await?;
        let credential = self.flow.exchange_code_for_token(config, authorization).await?;
        self.vault.save(&credential).await?;
        tracing::info!("Signed in (tenant {})", config.tenant_id());
        Ok(credential)
    }

    /// Access token for another audience, derived from the stored refresh
    /// token. `Ok(None)` when there is no usable session.
    pub async fn scoped_token(
        &self,
        config: &Configuration,
        scope: &str,
    ) -> Result<Option<Credential>, AuthError> {
        let Some(cred) = self.valid_access_token(config).await? else {
            return Ok(None);
        };
        let Some(refresh_token) = cred.refresh_token.as_deref() else {
            return Ok(None);
        };
        self.flow
            .acquire_scoped_token(config, refresh_token, scope)
            .await
            .map(Some)
    }

    /// Forget the stored credential. Succeeds when there is nothing to clear.
    pub async fn sign_out(&self) -> Result<(), VaultError> {
        self.vault.clear().await?;
        tracing::info!("Signed out");
        Ok(())
    }
}
