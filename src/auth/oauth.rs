//! OAuth2 authorization code + PKCE flow against the Entra ID authority
//!
//! `oauth2` supplies the typed endpoint URLs. Token requests are posted
//! directly so form bodies stay sorted and Entra error bodies can be read.

use std::collections::BTreeMap;
use std::fmt;

use oauth2::{AuthUrl, RedirectUrl, TokenUrl};
use serde::{de, Deserialize};
use thiserror::Error;
use url::Url;

use super::browser::{AuthorizationSurface, SurfaceOutcome};
use super::pkce::{EntropyError, PkceChallenge};
use super::tokens::Credential;
use super::vault::VaultError;
use crate::config::{Configuration, Settings};
use crate::error::ConfigurationError;

/// Scopes requested on top of the resource API's default scope.
const IDENTITY_SCOPES: &str = "offline_access openid profile";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in was cancelled")]
    UserCancelled,
    #[error("the redirect did not carry an authorization code")]
    MissingAuthorizationCode,
    #[error("identity provider error: {0}")]
    Server(String),
    #[error("cannot start sign-in: {0}")]
    UnableToStart(String),
    #[error("invalid authority endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
    #[error("a sign-in is already in progress")]
    AlreadyInProgress,
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Code + verifier from a successful redirect. Consumed by the exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    pub verifier: String,
}

impl fmt::Debug for AuthorizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationResult { .. }")
    }
}

fn int_or_string<'de, D: de::Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<i64>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer or stringified integer")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            i64::try_from(v).map(Some).map_err(E::custom)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.trim().parse().map(Some).map_err(E::custom)
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
    d.deserialize_any(Visitor)
}

/// Token endpoint body: success and error fields share one shape.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "int_or_string")]
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Tokens from one successful token endpoint call.
struct IssuedTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Drives the browser step and the code/refresh token exchanges.
pub struct AuthorizationFlow {
    http: reqwest::Client,
    authority_host: String,
    redirect_uri: String,
    api_scope: String,
}

impl AuthorizationFlow {
    pub fn new(http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http,
            authority_host: settings.authority_host.trim_end_matches('/').to_string(),
            redirect_uri: settings.redirect_uri.clone(),
            api_scope: settings.api_scope.clone(),
        }
    }

    fn authorize_endpoint(&self, config: &Configuration) -> Result<AuthUrl, AuthError> {
        AuthUrl::new(format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_host,
            config.tenant_id()
        ))
        .map_err(|e| AuthError::InvalidEndpoint(e.to_string()))
    }

    fn token_endpoint(&self, config: &Configuration) -> Result<TokenUrl, AuthError> {
        TokenUrl::new(format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host,
            config.tenant_id()
        ))
        .map_err(|e| AuthError::InvalidEndpoint(e.to_string()))
    }

    fn redirect_url(&self) -> Result<RedirectUrl, AuthError> {
        RedirectUrl::new(self.redirect_uri.clone())
            .map_err(|e| AuthError::InvalidEndpoint(e.to_string()))
    }

    /// Space-separated scopes for authorization and token requests.
    pub fn scopes(&self) -> String {
        format!("{} {}", self.api_scope, IDENTITY_SCOPES)
    }

    /// Authorization URL carrying the PKCE challenge.
    pub fn authorization_url(
        &self,
        config: &Configuration,
        pkce: &PkceChallenge,
    ) -> Result<Url, AuthError> {
        let mut url = self.authorize_endpoint(config)?.url().clone();
        url.query_pairs_mut()
            .append_pair("client_id", config.client_id())
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scopes())
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method())
            .append_pair("prompt", "select_account");
        Ok(url)
    }

    /// Run the interactive step and return the code bound to a fresh verifier.
    pub async fn request_authorization_code(
        &self,
        config: &Configuration,
        surface: &dyn AuthorizationSurface,
    ) -> Result<AuthorizationResult, AuthError> {
        config.ensure_complete()?;
        let pkce = PkceChallenge::generate()?;
        let url = self.authorization_url(config, &pkce)?;
        let redirect = self.redirect_url()?;

        tracing::info!("Waiting for interactive sign-in (tenant {})", config.tenant_id());

        match surface.present(&url, redirect.url()).await {
            SurfaceOutcome::Redirected(callback) => parse_redirect(&callback, pkce.verifier),
            SurfaceOutcome::Cancelled => Err(AuthError::UserCancelled),
            SurfaceOutcome::Failed(reason) => Err(AuthError::UnableToStart(reason)),
        }
    }

    /// Redeem an authorization code.
    pub async fn exchange_code_for_token(
        &self,
        config: &Configuration,
        authorization: AuthorizationResult,
    ) -> Result<Credential, AuthError> {
        let scopes = self.scopes();
        let mut fields = BTreeMap::new();
        fields.insert("grant_type", "authorization_code");
        fields.insert("client_id", config.client_id());
        fields.insert("code", authorization.code.as_str());
        fields.insert("redirect_uri", self.redirect_uri.as_str());
        fields.insert("code_verifier", authorization.verifier.as_str());
        fields.insert("scope", scopes.as_str());

        let issued = self.token_request(config, &fields).await?;
        tracing::info!("Authorization code redeemed");
        Ok(Credential::new(
            config,
            issued.access_token,
            issued.refresh_token,
            issued.expires_in,
        ))
    }

    /// Redeem a refresh token for a new API credential. The old refresh
    /// token is kept when the response does not rotate it.
    pub async fn refresh_access_token(
        &self,
        config: &Configuration,
        refresh_token: &str,
    ) -> Result<Credential, AuthError> {
        let issued = self
            .redeem_refresh_token(config, refresh_token, &self.scopes())
            .await?;
        tracing::info!("Access token refreshed");
        Ok(Credential::new(
            config,
            issued.access_token,
            issued.refresh_token.or_else(|| Some(refresh_token.to_string())),
            issued.expires_in,
        ))
    }

    /// Token for another audience (e.g. OneLake storage) from the same
    /// refresh token. Not persisted.
    pub async fn acquire_scoped_token(
        &self,
        config: &Configuration,
        refresh_token: &str,
        scope: &str,
    ) -> Result<Credential, AuthError> {
        let issued = self
            .redeem_refresh_token(config, refresh_token, &format!("{} offline_access", scope))
            .await?;
        Ok(Credential::new(config, issued.access_token, None, issued.expires_in))
    }

    async fn redeem_refresh_token(
        &self,
        config: &Configuration,
        refresh_token: &str,
        scopes: &str,
    ) -> Result<IssuedTokens, AuthError> {
        let mut fields = BTreeMap::new();
        fields.insert("grant_type", "refresh_token");
        fields.insert("client_id", config.client_id());
        fields.insert("refresh_token", refresh_token);
        fields.insert("scope", scopes);
        self.token_request(config, &fields).await
    }

    async fn token_request(
        &self,
        config: &Configuration,
        fields: &BTreeMap<&str, &str>,
    ) -> Result<IssuedTokens, AuthError> {
        config.ensure_complete()?;
        let endpoint = self.token_endpoint(config)?;
        tracing::debug!("Token POST {}", endpoint.as_str());

        let resp = self
            .http
            .post(endpoint.url().clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form_body(fields))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        parse_token_response(status, &body)
    }
}

/// Form-encode fields in key order.
fn form_body(fields: &BTreeMap<&str, &str>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish()
}

/// Interpret a token endpoint reply. Error payloads arrive with 4xx status
/// and a JSON body, so the body is always decoded before the status is
/// considered.
fn parse_token_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<IssuedTokens, AuthError> {
    let parsed: TokenResponse = serde_json::from_str(body).map_err(|e| {
        AuthError::InvalidResponse(format!("HTTP {}: {}", status.as_u16(), e))
    })?;

    if let Some(error) = parsed.error {
        return Err(AuthError::Server(
            parsed.error_description.unwrap_or(error),
        ));
    }
    if !status.is_success() {
        return Err(AuthError::Server(format!(
            "token endpoint returned HTTP {}",
            status.as_u16()
        )));
    }

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidResponse("missing access_token".to_string()))?;

    Ok(IssuedTokens {
        access_token,
        refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
        expires_in: parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
    })
}

/// Pull the code (or error) out of the redirect back to the client.
pub fn parse_redirect(callback: &Url, verifier: String) -> Result<AuthorizationResult, AuthError> {
    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in callback.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AuthError::Server(description.unwrap_or(error)));
    }
    match code.filter(|c| !c.is_empty()) {
        Some(code) => Ok(AuthorizationResult { code, verifier }),
        None => Err(AuthError::MissingAuthorizationCode),
    }
}
