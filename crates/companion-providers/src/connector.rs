//! Service connector types shared across providers.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use companion_core::event::{CanonicalEvent, ProviderKind};

use crate::error::ProviderResult;
use crate::google::GoogleConnector;
use crate::oauth::{AuthorizationFlow, PersistedCredential};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// OAuth client registration owned by the embedder.
///
/// The redirect URI is part of the registration: loopback-style
/// deployments derive it from their install identity.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

/// Persisted form of one connected account, stored as an entry under the
/// `onlineservices.config` key.
///
/// `auth` is absent when the credential had no refresh token at persist
/// time; such an entry restores to a connector that needs a fresh
/// interactive sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<PersistedCredential>,
}

/// Result of one connector fetch round.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The round completed; the list may be empty.
    Events(Vec<CanonicalEvent>),
    /// The provider could not be reached. Nothing is known about the
    /// account's current state, so this must not be mistaken for "no
    /// events".
    NetworkDown,
    /// The provider rejected our credentials. The connector is dead and
    /// should be removed; reconnecting requires the interactive flow.
    AuthRevoked,
}

/// A configured account connector.
///
/// Closed over provider kinds: adding a provider means adding a variant
/// together with its endpoint table and payload parser.
pub enum ServiceConnector {
    Google(GoogleConnector),
}

impl ServiceConnector {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Google(_) => ProviderKind::Google,
        }
    }

    /// Stable identifier stamped onto events, one connector per provider
    /// kind.
    pub fn service_id(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Runs the interactive sign-in for this connector.
    pub async fn connect(&self, flow: &dyn AuthorizationFlow) -> ProviderResult<Option<String>> {
        match self {
            Self::Google(google) => google.connect(flow).await,
        }
    }

    /// Fetches and normalizes today's events.
    pub async fn get_next_meetings(&self) -> FetchOutcome {
        match self {
            Self::Google(google) => google.get_next_meetings().await,
        }
    }

    /// Revokes the underlying grant, best effort.
    pub async fn revoke(&self) -> ProviderResult<()> {
        match self {
            Self::Google(google) => google.revoke().await,
        }
    }

    /// The explicit counterpart to construction from a [`ServiceConfig`].
    pub fn to_config(&self) -> ServiceConfig {
        match self {
            Self::Google(google) => google.to_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_tags_the_provider_type() {
        let config = ServiceConfig {
            provider: ProviderKind::Google,
            auth: None,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "google");
        assert!(json.get("auth").is_none());
    }

    #[test]
    fn config_with_credential_round_trips() {
        let config = ServiceConfig {
            provider: ProviderKind::Google,
            auth: Some(PersistedCredential {
                access_token: Some("a".to_string()),
                refresh_token: "r".to_string(),
                expires_at: None,
            }),
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn unknown_provider_types_fail_to_parse() {
        let err = serde_json::from_str::<ServiceConfig>(r#"{"type":"exchange"}"#);
        assert!(err.is_err());
    }
}
