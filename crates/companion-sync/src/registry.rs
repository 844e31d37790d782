//! Registry of configured service connectors.
//!
//! One [`ServiceRegistry`] owns every connected account: it restores them
//! from the persisted config on startup, runs the fan-out fetch rounds,
//! and keeps the config entry current as credentials rotate. It is an
//! explicit context object; embedders decide where it lives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use companion_core::event::{CanonicalEvent, ProviderKind};
use companion_providers::google::{self, GoogleConnector};
use companion_providers::oauth::{AuthorizationFlow, Issuer};
use companion_providers::{ClientRegistration, FetchOutcome, ServiceConfig, ServiceConnector};

use crate::error::SyncResult;
use crate::store::{CONFIG_KEY, EVENTS_KEY, KeyValueStore};

pub struct ServiceRegistry {
    store: Arc<dyn KeyValueStore>,
    issuer: Issuer,
    api_base: Option<String>,
    connectors: tokio::sync::Mutex<Vec<Arc<ServiceConnector>>>,
    /// One fetch round at a time; overlapping triggers are dropped, not
    /// queued.
    fetching: AtomicBool,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, registration: &ClientRegistration) -> Self {
        Self {
            store,
            issuer: google::issuer_for(registration),
            api_base: None,
            connectors: tokio::sync::Mutex::new(Vec::new()),
            fetching: AtomicBool::new(false),
        }
    }

    /// Overrides the Google endpoints, for tests and proxies.
    #[must_use]
    pub fn with_google_endpoints(mut self, issuer: Issuer, api_base: impl Into<String>) -> Self {
        self.issuer = issuer;
        self.api_base = Some(api_base.into());
        self
    }

    /// Restores connectors from the persisted config.
    ///
    /// Entries that fail to parse, including provider types this build
    /// does not know, are logged and skipped rather than failing startup.
    pub async fn init(&self) -> SyncResult<()> {
        let Some(value) = self.store.get(CONFIG_KEY).await? else {
            debug!("no persisted service config");
            return Ok(());
        };
        let entries: Vec<serde_json::Value> = serde_json::from_value(value)?;
        let mut connectors = self.connectors.lock().await;
        for entry in entries {
            match serde_json::from_value::<ServiceConfig>(entry) {
                Ok(config) => {
                    info!(service = config.provider.as_str(), "restoring service");
                    connectors.push(Arc::new(self.build_connector(config)));
                }
                Err(err) => warn!(error = %err, "skipping unrecognized service entry"),
            }
        }
        Ok(())
    }

    fn build_connector(&self, config: ServiceConfig) -> ServiceConnector {
        match config.provider {
            ProviderKind::Google => {
                let mut connector =
                    GoogleConnector::from_issuer(self.issuer.clone(), config.auth.as_ref());
                if let Some(base) = &self.api_base {
                    connector = connector.with_api_base(base.clone());
                }
                ServiceConnector::Google(connector)
            }
        }
    }

    pub async fn services(&self) -> Vec<Arc<ServiceConnector>> {
        self.connectors.lock().await.clone()
    }

    pub async fn services_of(&self, kind: ProviderKind) -> Vec<Arc<ServiceConnector>> {
        self.connectors
            .lock()
            .await
            .iter()
            .filter(|connector| connector.kind() == kind)
            .cloned()
            .collect()
    }

    /// Runs the interactive sign-in for a new service.
    ///
    /// Returns `None` when the user aborts or the provider hands back no
    /// token; nothing is registered in that case.
    pub async fn create_service(
        &self,
        kind: ProviderKind,
        flow: &dyn AuthorizationFlow,
    ) -> SyncResult<Option<Arc<ServiceConnector>>> {
        let connector = Arc::new(self.build_connector(ServiceConfig {
            provider: kind,
            auth: None,
        }));
        match connector.connect(flow).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(service = kind.as_str(), "sign-in yielded no token");
                return Ok(None);
            }
            Err(err) => {
                warn!(service = kind.as_str(), error = %err, "sign-in failed");
                return Ok(None);
            }
        }
        info!(service = kind.as_str(), "service connected");
        self.connectors.lock().await.push(connector.clone());
        self.persist().await?;
        Ok(Some(connector))
    }

    /// Disconnects a service: best-effort revocation, removal, persist.
    pub async fn delete_service(&self, connector: &Arc<ServiceConnector>) -> SyncResult<()> {
        // The user may already have revoked us server-side.
        if let Err(err) = connector.revoke().await {
            info!(service = connector.kind().as_str(), error = %err, "token revocation failed");
        }
        self.connectors
            .lock()
            .await
            .retain(|existing| !Arc::ptr_eq(existing, connector));
        info!(service = connector.kind().as_str(), "service removed");
        self.persist().await
    }

    /// Writes the current connector configs under the config key.
    pub async fn persist(&self) -> SyncResult<()> {
        let configs: Vec<ServiceConfig> = self
            .connectors
            .lock()
            .await
            .iter()
            .map(|connector| connector.to_config())
            .collect();
        self.store
            .set(CONFIG_KEY, serde_json::to_value(configs)?)
            .await?;
        Ok(())
    }

    /// Runs one fetch round across all connectors and publishes the merge.
    ///
    /// A round already in flight makes this a no-op. The merged list is
    /// only published when at least one connector produced a result, so a
    /// total outage never wipes the last known events.
    pub async fn fetch_events(&self) -> SyncResult<()> {
        if self.fetching.swap(true, Ordering::SeqCst) {
            debug!("fetch already in flight, dropping trigger");
            return Ok(());
        }
        let connectors = self.connectors.lock().await.clone();
        let result = self.fetch_round(&connectors).await;
        self.fetching.store(false, Ordering::SeqCst);
        result
    }

    async fn fetch_round(&self, connectors: &[Arc<ServiceConnector>]) -> SyncResult<()> {
        let outcomes = join_all(
            connectors
                .iter()
                .map(|connector| connector.get_next_meetings()),
        )
        .await;

        let mut merged: Vec<CanonicalEvent> = Vec::new();
        let mut any_result = false;
        let mut revoked: Vec<Arc<ServiceConnector>> = Vec::new();
        for (connector, outcome) in connectors.iter().zip(outcomes) {
            match outcome {
                FetchOutcome::Events(events) => {
                    any_result = true;
                    merged.extend(events);
                }
                FetchOutcome::NetworkDown => {
                    warn!(
                        service = connector.kind().as_str(),
                        "service unreachable, keeping last known events"
                    );
                }
                // The provider answered, just not in our favor; this
                // still counts as a result for the publish policy.
                FetchOutcome::AuthRevoked => {
                    any_result = true;
                    revoked.push(connector.clone());
                }
            }
        }

        for connector in revoked {
            error!(
                service = connector.kind().as_str(),
                "access lost, removing service"
            );
            self.delete_service(&connector).await?;
        }

        // Refreshes rotate credentials; keep the persisted config current.
        self.persist().await?;

        if any_result {
            debug!(events = merged.len(), "publishing events");
            self.store
                .set(EVENTS_KEY, serde_json::to_value(merged)?)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use companion_providers::BoxFuture;
    use companion_providers::error::ProviderResult;

    use crate::store::MemoryStore;

    fn registration() -> ClientRegistration {
        ClientRegistration {
            client_id: "client-123".to_string(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1/callback".to_string(),
        }
    }

    fn test_issuer(token_endpoint: String) -> Issuer {
        Issuer {
            authorization_endpoint: "https://auth.example.com/authorize".to_string(),
            token_endpoint,
            revocation_endpoint: None,
            scopes: vec!["scope.read".to_string()],
            client_id: "client-123".to_string(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1/callback".to_string(),
        }
    }

    fn config_with_grant() -> serde_json::Value {
        serde_json::json!([
            {"type": "google", "auth": {"accessToken": "tok", "refreshToken": "refresh"}}
        ])
    }

    async fn mount_calendars_and_events(server: &MockServer, events: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "alice@example.com", "primary": true, "selected": true}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": events})),
            )
            .mount(server)
            .await;
    }

    fn timed_event(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "summary": id,
            "start": {"dateTime": "2024-03-04T10:00:00Z"},
            "end": {"dateTime": "2024-03-04T11:00:00Z"}
        })
    }

    struct FakeFlow {
        redirect: ProviderResult<String>,
    }

    impl FakeFlow {
        fn granting(code: &str) -> Self {
            Self {
                redirect: Ok(format!("http://127.0.0.1/callback?code={code}")),
            }
        }

        fn aborting() -> Self {
            Self {
                redirect: Err(companion_providers::ProviderError::Authentication(
                    "user closed the window".to_string(),
                )),
            }
        }
    }

    impl AuthorizationFlow for FakeFlow {
        fn authorize(&self, _auth_url: &str) -> BoxFuture<'_, ProviderResult<String>> {
            let result = match &self.redirect {
                Ok(url) => Ok(url.clone()),
                Err(_) => Err(companion_providers::ProviderError::Authentication(
                    "user closed the window".to_string(),
                )),
            };
            Box::pin(async move { result })
        }
    }

    fn registry_for(
        store: Arc<MemoryStore>,
        token_endpoint: String,
        api_base: String,
    ) -> ServiceRegistry {
        ServiceRegistry::new(store, &registration())
            .with_google_endpoints(test_issuer(token_endpoint), api_base)
    }

    #[tokio::test]
    async fn init_restores_known_services_and_skips_unknown_ones() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                CONFIG_KEY,
                serde_json::json!([
                    {"type": "google", "auth": {"accessToken": "tok", "refreshToken": "refresh"}},
                    {"type": "exchange", "auth": {}}
                ]),
            )
            .await
            .unwrap();

        let registry = registry_for(
            store.clone(),
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1".to_string(),
        );
        registry.init().await.unwrap();

        let services = registry.services().await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].kind(), ProviderKind::Google);
    }

    #[tokio::test]
    async fn init_without_config_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_for(
            store,
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1".to_string(),
        );
        registry.init().await.unwrap();
        assert!(registry.services().await.is_empty());
    }

    #[tokio::test]
    async fn create_service_registers_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let registry = registry_for(
            store.clone(),
            format!("{}/token", server.uri()),
            server.uri(),
        );

        let connector = registry
            .create_service(ProviderKind::Google, &FakeFlow::granting("abc"))
            .await
            .unwrap();
        assert!(connector.is_some());
        assert_eq!(registry.services().await.len(), 1);

        let config = store.snapshot(CONFIG_KEY).unwrap();
        assert_eq!(config[0]["type"], "google");
        assert_eq!(config[0]["auth"]["refreshToken"], "refresh-1");
    }

    #[tokio::test]
    async fn an_aborted_sign_in_registers_nothing() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_for(
            store.clone(),
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1".to_string(),
        );

        let connector = registry
            .create_service(ProviderKind::Google, &FakeFlow::aborting())
            .await
            .unwrap();
        assert!(connector.is_none());
        assert!(registry.services().await.is_empty());
        assert!(store.snapshot(CONFIG_KEY).is_none());
    }

    #[tokio::test]
    async fn delete_service_removes_even_when_revocation_fails() {
        let store = Arc::new(MemoryStore::new());
        store.set(CONFIG_KEY, config_with_grant()).await.unwrap();

        let mut issuer = test_issuer("http://127.0.0.1:1/token".to_string());
        // Unreachable revocation endpoint; the failure must stay local.
        issuer.revocation_endpoint = Some("http://127.0.0.1:1/revoke".to_string());
        let registry = ServiceRegistry::new(store.clone(), &registration())
            .with_google_endpoints(issuer, "http://127.0.0.1:1".to_string());
        registry.init().await.unwrap();

        let services = registry.services().await;
        registry.delete_service(&services[0]).await.unwrap();

        assert!(registry.services().await.is_empty());
        assert_eq!(store.snapshot(CONFIG_KEY).unwrap(), serde_json::json!([]));
    }

    #[tokio::test]
    async fn fetch_publishes_merged_events_and_repersists_config() {
        let server = MockServer::start().await;
        mount_calendars_and_events(&server, vec![timed_event("evt1")]).await;

        let store = Arc::new(MemoryStore::new());
        store.set(CONFIG_KEY, config_with_grant()).await.unwrap();
        let registry = registry_for(
            store.clone(),
            format!("{}/token", server.uri()),
            server.uri(),
        );
        registry.init().await.unwrap();

        registry.fetch_events().await.unwrap();

        let events = store.snapshot(EVENTS_KEY).unwrap();
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["id"], "evt1");
        assert_eq!(events[0]["calendarId"], "primary");
        // The config entry survives the round.
        assert_eq!(store.snapshot(CONFIG_KEY).unwrap()[0]["type"], "google");
    }

    #[tokio::test]
    async fn an_unreachable_round_keeps_the_last_events() {
        let store = Arc::new(MemoryStore::new());
        store.set(CONFIG_KEY, config_with_grant()).await.unwrap();
        store
            .set(EVENTS_KEY, serde_json::json!([{"id": "stale-but-good"}]))
            .await
            .unwrap();

        let registry = registry_for(
            store.clone(),
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1".to_string(),
        );
        registry.init().await.unwrap();

        registry.fetch_events().await.unwrap();

        let events = store.snapshot(EVENTS_KEY).unwrap();
        assert_eq!(events[0]["id"], "stale-but-good");
    }

    #[tokio::test]
    async fn a_round_with_no_services_publishes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_for(
            store.clone(),
            "http://127.0.0.1:1/token".to_string(),
            "http://127.0.0.1:1".to_string(),
        );

        registry.fetch_events().await.unwrap();
        assert!(store.snapshot(EVENTS_KEY).is_none());
    }

    #[tokio::test]
    async fn overlapping_triggers_run_one_round() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "items": [{"id": "alice@example.com", "primary": true, "selected": true}]
                    }))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.set(CONFIG_KEY, config_with_grant()).await.unwrap();
        let registry = Arc::new(registry_for(
            store,
            format!("{}/token", server.uri()),
            server.uri(),
        ));
        registry.init().await.unwrap();

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.fetch_events().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Dropped: the first round is still in flight.
        registry.fetch_events().await.unwrap();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn a_revoked_service_is_removed_during_the_round() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.set(CONFIG_KEY, config_with_grant()).await.unwrap();
        let registry = registry_for(
            store.clone(),
            format!("{}/token", server.uri()),
            server.uri(),
        );
        registry.init().await.unwrap();

        registry.fetch_events().await.unwrap();

        assert!(registry.services().await.is_empty());
        assert_eq!(store.snapshot(CONFIG_KEY).unwrap(), serde_json::json!([]));
        // The provider did answer, so the (empty) merge is published.
        assert_eq!(store.snapshot(EVENTS_KEY).unwrap(), serde_json::json!([]));
    }
}
