//! OAuth2 token lifecycle for a single connected account.
//!
//! [`TokenStore`] owns the credential for one grant and hands out access
//! tokens on demand. Callers never see refresh mechanics: `get_token`
//! returns the cached token while it is valid, refreshes it when a refresh
//! token is held, and coalesces concurrent callers into a single token
//! request.
//!
//! The interactive part of the authorization-code grant (RFC 6749 §4.1)
//! is delegated to an [`AuthorizationFlow`], since only the embedder knows
//! how to put a consent screen in front of the user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::connector::BoxFuture;
use crate::error::{ProviderError, ProviderResult};

/// OAuth2 endpoints and client registration for one provider.
#[derive(Debug, Clone)]
pub struct Issuer {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// RFC 7009 endpoint; not every provider offers one.
    pub revocation_endpoint: Option<String>,
    pub scopes: Vec<String>,
    pub client_id: String,
    /// Omitted from token requests entirely when `None` (RFC 6749 §2.3.1),
    /// never sent as an empty string.
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

/// Token state for one grant.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token. `None` on a held token means
    /// the provider sent no `expires_in`, which we treat as never expiring.
    pub expires_at: Option<DateTime<Utc>>,
    /// Sticky marker that the last token request was rejected by the
    /// authorization server.
    pub last_error: bool,
}

impl Credential {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }

    fn usable_token(&self) -> Option<String> {
        if self.is_expired() {
            return None;
        }
        self.access_token.clone()
    }

    /// Serialized form, or `None` when there is no refresh token: a
    /// credential with no renewal path is not worth persisting.
    pub fn to_persisted(&self) -> Option<PersistedCredential> {
        let refresh_token = self.refresh_token.clone()?;
        Some(PersistedCredential {
            access_token: self.access_token.clone(),
            refresh_token,
            expires_at: self.expires_at,
        })
    }

    pub fn from_persisted(persisted: &PersistedCredential) -> Self {
        Self {
            access_token: persisted.access_token.clone(),
            refresh_token: Some(persisted.refresh_token.clone()),
            expires_at: persisted.expires_at,
            last_error: false,
        }
    }
}

/// The shape stored inside a service's persisted config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token endpoint response body (RFC 6749 §5).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// The embedder's interactive authorization surface.
///
/// `authorize` presents `auth_url` to the user and resolves with the full
/// redirect URL (carrying the `code` parameter) once the provider sends
/// the user back.
pub trait AuthorizationFlow: Send + Sync {
    fn authorize(&self, auth_url: &str) -> BoxFuture<'_, ProviderResult<String>>;
}

/// Owns and renews the credential for one connected account.
pub struct TokenStore {
    issuer: Issuer,
    http: reqwest::Client,
    credential: std::sync::Mutex<Credential>,
    /// Serializes token requests so concurrent `get_token` callers share
    /// one refresh instead of issuing duplicates.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl TokenStore {
    pub fn new(issuer: Issuer) -> Self {
        Self::with_credential(issuer, Credential::default())
    }

    pub fn with_credential(issuer: Issuer, credential: Credential) -> Self {
        Self {
            issuer,
            http: reqwest::Client::new(),
            credential: std::sync::Mutex::new(credential),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// A snapshot of the current credential.
    pub fn credential(&self) -> Credential {
        self.credential.lock().unwrap().clone()
    }

    /// Whether the authorization server rejected the last token request.
    pub fn last_error(&self) -> bool {
        self.credential.lock().unwrap().last_error
    }

    fn cached_token(&self) -> Option<String> {
        self.credential.lock().unwrap().usable_token()
    }

    fn has_refresh_token(&self) -> bool {
        self.credential.lock().unwrap().refresh_token.is_some()
    }

    /// Returns a valid access token, refreshing if needed.
    ///
    /// `Ok(None)` means there is no usable grant: either the store was
    /// never connected, or the authorization server rejected the refresh
    /// and the tokens were dropped (check [`TokenStore::last_error`]).
    /// Transport failures surface as [`ProviderError::Network`] and leave
    /// the credential untouched.
    pub async fn get_token(&self) -> ProviderResult<Option<String>> {
        if let Some(token) = self.cached_token() {
            return Ok(Some(token));
        }
        if !self.has_refresh_token() {
            return Ok(None);
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have finished the refresh while we waited.
        if let Some(token) = self.cached_token() {
            return Ok(Some(token));
        }
        if !self.has_refresh_token() {
            return Ok(None);
        }
        debug!("access token expired, requesting a new one");
        self.request_access_token(None).await
    }

    /// Runs the interactive authorization-code grant and exchanges the
    /// resulting code for tokens.
    pub async fn connect(&self, flow: &dyn AuthorizationFlow) -> ProviderResult<Option<String>> {
        let auth_url = self.authorization_url()?;
        let redirect = flow.authorize(&auth_url).await?;
        let code = extract_code(&redirect)?;
        self.request_access_token(Some(&code)).await
    }

    /// Best-effort RFC 7009 revocation. Local state is cleared regardless
    /// of the network outcome; a failure is surfaced so the caller can log
    /// it.
    pub async fn revoke(&self) -> ProviderResult<()> {
        let token = {
            let mut credential = self.credential.lock().unwrap();
            let token = credential
                .refresh_token
                .clone()
                .or_else(|| credential.access_token.clone());
            *credential = Credential::default();
            token
        };
        let (Some(endpoint), Some(token)) = (&self.issuer.revocation_endpoint, token) else {
            return Ok(());
        };
        let response = self
            .http
            .post(endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("revocation request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn authorization_url(&self) -> ProviderResult<String> {
        let mut url = Url::parse(&self.issuer.authorization_endpoint).map_err(|e| {
            ProviderError::Configuration(format!("invalid authorization endpoint: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.issuer.client_id)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "select_account")
            .append_pair("redirect_uri", &self.issuer.redirect_uri)
            .append_pair("scope", &self.issuer.scopes.join(" "));
        Ok(url.into())
    }

    /// Form-POST to the token endpoint, per RFC 6749 §4.1.3 (code
    /// exchange) or §6 (refresh, when `code` is `None`).
    ///
    /// An `error` field in the response body means the grant itself is
    /// gone (typically `invalid_grant`): both tokens are dropped,
    /// `last_error` is set and `Ok(None)` returned so the caller can
    /// re-run the interactive flow.
    async fn request_access_token(&self, code: Option<&str>) -> ProviderResult<Option<String>> {
        let mut form: Vec<(&str, String)> = vec![("client_id", self.issuer.client_id.clone())];
        if let Some(secret) = &self.issuer.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        match code {
            Some(code) => {
                form.push(("grant_type", "authorization_code".to_string()));
                form.push(("code", code.to_string()));
                form.push(("redirect_uri", self.issuer.redirect_uri.clone()));
            }
            None => {
                let refresh_token =
                    self.credential.lock().unwrap().refresh_token.clone().ok_or_else(|| {
                        ProviderError::Authentication("no refresh token held".to_string())
                    })?;
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh_token));
            }
        }

        let response = self
            .http
            .post(&self.issuer.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("token request failed: {e}")))?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {e}")))?;

        if let Some(err) = body.error {
            error!(
                error = %err,
                description = body.error_description.as_deref().unwrap_or(""),
                "authorization server rejected the token request"
            );
            let mut credential = self.credential.lock().unwrap();
            credential.access_token = None;
            credential.refresh_token = None;
            credential.expires_at = None;
            credential.last_error = true;
            return Ok(None);
        }

        let access_token = body.access_token.ok_or_else(|| {
            ProviderError::InvalidResponse("token response carried no access_token".to_string())
        })?;
        let mut credential = self.credential.lock().unwrap();
        credential.last_error = false;
        credential.access_token = Some(access_token.clone());
        // The refresh token is only rotated when the server sends one.
        if let Some(refresh_token) = body.refresh_token {
            credential.refresh_token = Some(refresh_token);
        }
        credential.expires_at = body.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        debug!("received a fresh access token");
        Ok(Some(access_token))
    }
}

fn extract_code(redirect: &str) -> ProviderResult<String> {
    let url = Url::parse(redirect)
        .map_err(|e| ProviderError::InvalidResponse(format!("redirect URL: {e}")))?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| {
            ProviderError::Authentication("authorization response carried no code".to_string())
        })
}
