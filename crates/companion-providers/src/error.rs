//! Error types for service connectors.

use thiserror::Error;

/// Errors from connectors and the OAuth client.
///
/// The variants matter to callers: `Network` means the provider could not
/// be reached and nothing can be said about the account's state, while
/// `Authentication` means the provider rejected our credentials and the
/// connector needs a fresh interactive sign-in.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
