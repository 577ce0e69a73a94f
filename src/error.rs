//! Error taxonomy shared by the auth, api and controller layers

use thiserror::Error;

pub use crate::api::ApiError;
pub use crate::auth::{AuthError, VaultError};

/// Tenant or client identifier missing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("tenant ID and client ID must both be set (see FABRIC_TENANT_ID / FABRIC_CLIENT_ID)")]
    Incomplete,
}

/// Any failure an orchestrated operation can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("not signed in; run 'fabric-cli login'")]
    NotSignedIn,
}

impl Error {
    /// Cancellation is a user choice, not something to put in front of them.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, Error::Auth(AuthError::UserCancelled))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api(ApiError::Unauthorized))
    }
}
