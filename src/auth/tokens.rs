//! Credential record and access token claims

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Configuration;

/// Window before `expires_at` in which a credential counts as near expiry.
pub const NEAR_EXPIRY_WINDOW_SECS: i64 = 300;

/// The single persisted credential: tokens plus the configuration they
/// were issued for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub tenant_id: String,
    pub client_id: String,
}

impl Credential {
    pub fn new(
        config: &Configuration,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            tenant_id: config.tenant_id().to_string(),
            client_id: config.client_id().to_string(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_near_expiry(&self) -> bool {
        self.is_near_expiry_at(Utc::now())
    }

    pub fn is_near_expiry_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(NEAR_EXPIRY_WINDOW_SECS)
    }

    /// Tenant and client IDs compare case-insensitively.
    pub fn matches(&self, config: &Configuration) -> bool {
        self.tenant_id.eq_ignore_ascii_case(config.tenant_id())
            && self.client_id.eq_ignore_ascii_case(config.client_id())
    }

    /// Claims from the access token payload, if it is a readable JWT.
    pub fn claims(&self) -> Option<TokenClaims> {
        TokenClaims::decode(&self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Identity claims read from the JWT payload.
///
/// The signature is not verified: the token is only ever presented back to
/// the service that issued it, these fields are for display and for finding
/// the caller's own role assignment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    /// Object ID of the signed-in principal
    pub oid: Option<String>,
    /// Tenant ID the token was issued in
    pub tid: Option<String>,
    pub name: Option<String>,
    pub upn: Option<String>,
    pub preferred_username: Option<String>,
}

impl TokenClaims {
    pub fn decode(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        // Some issuers pad the segment; the URL-safe engine rejects '='
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Best human-readable account name.
    pub fn account(&self) -> Option<&str> {
        self.upn
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.name.as_deref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn credential(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
        }
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let cred = credential(now);
        assert!(cred.is_expired_at(now));
        assert!(cred.is_near_expiry_at(now));

        let cred = credential(now - Duration::seconds(1));
        assert!(cred.is_expired_at(now));

        let cred = credential(now + Duration::seconds(60));
        assert!(!cred.is_expired_at(now));
        assert!(cred.is_near_expiry_at(now));

        let cred = credential(now + Duration::seconds(NEAR_EXPIRY_WINDOW_SECS));
        assert!(!cred.is_expired_at(now));
        assert!(cred.is_near_expiry_at(now));

        let cred = credential(now + Duration::hours(1));
        assert!(!cred.is_expired());
        assert!(!cred.is_near_expiry());
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let mut cred = credential(Utc::now());
        cred.tenant_id = "AbC".to_string();
        cred.client_id = "XyZ".to_string();
        assert!(cred.matches(&Configuration::new("abc", "xyz")));
        assert!(cred.matches(&Configuration::new(" ABC ", "xyz")));
        assert!(!cred.matches(&Configuration::new("abc", "other")));
        assert!(!cred.matches(&Configuration::new("other", "xyz")));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = credential(Utc::now());
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("access\""));
        assert!(!shown.contains("\"refresh\""));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("tenant"));
    }

    #[test]
    fn test_decode_claims() {
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "oid": "00000000-aaaa",
                "tid": "tenant-guid",
                "upn": "ada@contoso.com",
                "name": "Ada"
            })
            .to_string(),
        );
        let token = format!("header.{}.signature", payload);
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.oid.as_deref(), Some("00000000-aaaa"));
        assert_eq!(claims.account(), Some("ada@contoso.com"));

        assert!(TokenClaims::decode("opaque-token").is_none());
        assert!(TokenClaims::decode("a.!!!.c").is_none());
    }
}
