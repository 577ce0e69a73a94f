//! Tenant/client configuration and on-disk settings

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Env var holding the Entra ID tenant (GUID or domain).
pub const TENANT_ENV: &str = "FABRIC_TENANT_ID";
/// Env var holding the public client (application) ID.
pub const CLIENT_ENV: &str = "FABRIC_CLIENT_ID";

/// Multi-tenant default: any work/school account.
pub const DEFAULT_TENANT_ID: &str = "organizations";
/// Well-known public client registered for native/desktop use.
pub const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// Upper bound on concurrent fan-out sub-requests.
pub const MAX_FANOUT: usize = 10;

/// The active tenant + client pair. One is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    tenant_id: String,
    client_id: String,
}

impl Configuration {
    pub fn new(tenant_id: impl AsRef<str>, client_id: impl AsRef<str>) -> Self {
        Self {
            tenant_id: tenant_id.as_ref().trim().to_string(),
            client_id: client_id.as_ref().trim().to_string(),
        }
    }

    /// Build from the environment, falling back to the multi-tenant defaults
    /// when a variable is unset or blank.
    pub fn from_env() -> Self {
        Self::new(
            env_or_default(TENANT_ENV, DEFAULT_TENANT_ID),
            env_or_default(CLIENT_ENV, DEFAULT_CLIENT_ID),
        )
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_complete(&self) -> bool {
        !self.tenant_id.is_empty() && !self.client_id.is_empty()
    }

    /// Fail with `ConfigurationError` unless both identifiers are present.
    pub fn ensure_complete(&self) -> Result<(), ConfigurationError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(ConfigurationError::Incomplete)
        }
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Endpoint and behaviour settings, persisted as `settings.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Entra ID authority host, without tenant segment
    pub authority_host: String,
    /// Versioned REST base, e.g. `https://api.fabric.microsoft.com/v1`
    pub api_base: String,
    /// OneLake DFS endpoint for file uploads
    pub onelake_base: String,
    /// Redirect URI registered for the public client
    pub redirect_uri: String,
    /// Default scope of the resource API
    pub api_scope: String,
    /// Scope for OneLake storage tokens
    pub storage_scope: String,
    pub poll_interval_secs: u64,
    pub fanout_limit: usize,
    pub error_dismiss_secs: u64,
    pub upload_chunk_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            authority_host: "https://login.microsoftonline.com".to_string(),
            api_base: "https://api.fabric.microsoft.com/v1".to_string(),
            onelake_base: "https://onelake.dfs.fabric.microsoft.com".to_string(),
            redirect_uri: "http://localhost:8400/auth/callback".to_string(),
            api_scope: "https://api.fabric.microsoft.com/.default".to_string(),
            storage_scope: "https://storage.azure.com/.default".to_string(),
            poll_interval_secs: 30,
            fanout_limit: 8,
            error_dismiss_secs: 6,
            upload_chunk_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "fabric-cli", "fabric-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.toml"))
    }

    /// Load settings from disk, or defaults when no file exists yet
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read settings file")?;
        toml::from_str(&content).context("Failed to parse settings file")
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::settings_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&path, content).context("Failed to write settings file")?;
        Ok(())
    }

    /// Path of the settings file, for `status` output.
    pub fn location() -> Option<PathBuf> {
        Self::settings_path().ok()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn error_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.error_dismiss_secs)
    }

    /// Fan-out width, clamped so the remote API is never hit by more than
    /// `MAX_FANOUT` concurrent sub-requests.
    pub fn fanout(&self) -> usize {
        self.fanout_limit.clamp(1, MAX_FANOUT)
    }

    pub fn upload_chunk(&self) -> usize {
        self.upload_chunk_bytes.max(1)
    }

    /// Settings pointing every endpoint at one base URL (mock servers).
    #[cfg(test)]
    pub fn for_base(base: &str) -> Self {
        Self {
            authority_host: base.to_string(),
            api_base: format!("{}/v1", base),
            onelake_base: format!("{}/onelake", base),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_configuration() {
        assert!(!Configuration::new("", "client").is_complete());
        assert!(!Configuration::new("   ", "client").is_complete());
        assert!(!Configuration::new("tenant", "").is_complete());
        assert!(!Configuration::new("tenant", " \t\n").is_complete());
        assert!(Configuration::new("tenant", "client").is_complete());
    }

    #[test]
    fn test_configuration_trims_whitespace() {
        let config = Configuration::new("  contoso.com ", "\tabc-123\n");
        assert_eq!(config.tenant_id(), "contoso.com");
        assert_eq!(config.client_id(), "abc-123");
        assert!(config.ensure_complete().is_ok());
        assert!(matches!(
            Configuration::new(" ", "x").ensure_complete(),
            Err(ConfigurationError::Incomplete)
        ));
    }

    #[test]
    fn test_fanout_is_clamped() {
        let mut settings = Settings::default();
        settings.fanout_limit = 64;
        assert_eq!(settings.fanout(), MAX_FANOUT);
        settings.fanout_limit = 0;
        assert_eq!(settings.fanout(), 1);
    }

    #[test]
    fn test_partial_settings_file_uses_defaults() {
        let settings: Settings = toml::from_str("poll_interval_secs = 5").unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.api_base, Settings::default().api_base);
    }
}
