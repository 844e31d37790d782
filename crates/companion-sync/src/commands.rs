//! Command surface for embedders.
//!
//! UI layers drive the sync core with a small set of JSON-tagged
//! commands; state flows back through the store keys, never through
//! return values, so a popup that missed the response can still catch
//! up from storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use companion_core::event::ProviderKind;
use companion_providers::oauth::AuthorizationFlow;

use crate::error::SyncResult;
use crate::registry::ServiceRegistry;
use crate::store::{EVENTS_KEY, KeyValueStore, STATUS_KEY};

/// A command from the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Connect a new account through the interactive flow.
    Signin { service: ProviderKind },
    /// Disconnect the account and clear the published events.
    Signout,
    /// Trigger a fetch round now.
    Refresh,
}

/// Backend activity indicator published under the status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Idle,
    Fetching,
}

pub struct CommandHandler {
    registry: Arc<ServiceRegistry>,
    flow: Arc<dyn AuthorizationFlow>,
    store: Arc<dyn KeyValueStore>,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        flow: Arc<dyn AuthorizationFlow>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            registry,
            flow,
            store,
        }
    }

    pub async fn handle(&self, command: Command) -> SyncResult<()> {
        match command {
            Command::Signin { service } => self.sign_in(service).await,
            Command::Signout => self.sign_out().await,
            Command::Refresh => self.fetch().await,
        }
    }

    async fn sign_in(&self, service: ProviderKind) -> SyncResult<()> {
        let connector = self
            .registry
            .create_service(service, self.flow.as_ref())
            .await?;
        if connector.is_some() {
            self.fetch().await?;
        }
        Ok(())
    }

    async fn sign_out(&self) -> SyncResult<()> {
        match self.registry.services().await.into_iter().next() {
            Some(connector) => {
                info!(service = connector.kind().as_str(), "signing out");
                self.registry.delete_service(&connector).await?;
            }
            None => warn!("sign-out with no connected service"),
        }
        self.store.remove(EVENTS_KEY).await?;
        Ok(())
    }

    async fn fetch(&self) -> SyncResult<()> {
        self.set_status(BackendStatus::Fetching).await?;
        let result = self.registry.fetch_events().await;
        self.set_status(BackendStatus::Idle).await?;
        result
    }

    async fn set_status(&self, status: BackendStatus) -> SyncResult<()> {
        self.store
            .set(STATUS_KEY, serde_json::to_value(status)?)
            .await?;
        Ok(())
    }
}
