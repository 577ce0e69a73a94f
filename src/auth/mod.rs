//! Authentication for the Fabric REST API
//!
//! Implements the OAuth2 authorization code flow with PKCE against Entra ID,
//! using the system browser for the interactive step, and keeps the single
//! resulting credential in the OS keychain.

pub mod browser;
pub mod oauth;
pub mod pkce;
pub mod session;
pub mod tokens;
pub mod vault;

pub use browser::{AuthorizationSurface, SurfaceOutcome, SystemBrowserSurface};
pub use oauth::{AuthError, AuthorizationFlow, AuthorizationResult};
pub use pkce::{EntropyError, PkceChallenge};
pub use session::SessionManager;
pub use tokens::{Credential, TokenClaims};
pub use vault::{CredentialVault, KeyringVault, VaultError};
