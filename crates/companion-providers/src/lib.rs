//! Service connectors: OAuth2 token lifecycle and calendar fetching.
//!
//! One [`ServiceConnector`] represents one connected account. Each
//! connector owns a [`TokenStore`] for its grant and knows how to turn
//! its provider's wire format into [`companion_core::CanonicalEvent`]s:
//!
//! - [`TokenStore`] - token caching, single-flight refresh, code exchange
//! - [`AuthorizationFlow`] - the embedder's interactive consent surface
//! - [`GoogleConnector`] - calendar list, concurrent event fetch, dedup
//! - [`FetchOutcome`] - events, network-down, or grant-revoked

pub mod connector;
pub mod error;
pub mod google;
pub mod oauth;

pub use connector::{
    BoxFuture, ClientRegistration, FetchOutcome, ServiceConfig, ServiceConnector,
};
pub use error::{ProviderError, ProviderResult};
pub use google::GoogleConnector;
pub use oauth::{AuthorizationFlow, Credential, Issuer, PersistedCredential, TokenStore};
