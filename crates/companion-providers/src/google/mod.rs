//! Google service connector.
//!
//! Wires the OAuth token store and the calendar client into the fetch
//! pipeline: list calendars, fetch today's events from each visible one
//! concurrently, dedup across calendars and normalize.

pub mod client;
pub mod normalize;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use companion_core::event::{CanonicalEvent, ProviderKind};
use companion_core::time::local_day_window;

use crate::connector::{ClientRegistration, FetchOutcome, ServiceConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::oauth::{AuthorizationFlow, Credential, Issuer, PersistedCredential, TokenStore};

use client::{ApiEvent, GoogleCalendarClient};
use normalize::parse_google_calendar_result;

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";

const GOOGLE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/calendar.events.readonly",
    "https://www.googleapis.com/auth/calendar.calendarlist.readonly",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
];

/// The id under which the account's main calendar is fetched.
const PRIMARY_CALENDAR_ID: &str = "primary";

pub struct GoogleConnector {
    tokens: TokenStore,
    client: GoogleCalendarClient,
    /// Primary address of the signed-in account, learned from the calendar
    /// list. Secondary calendars report their own identity, so "self"
    /// marking needs this.
    primary_email: std::sync::Mutex<Option<String>>,
    /// Set while the provider is unreachable, so the error and recovery
    /// edges are logged exactly once each.
    connection_error: AtomicBool,
}

/// Google's OAuth endpoints and scopes bound to a client registration.
pub fn issuer_for(registration: &ClientRegistration) -> Issuer {
    Issuer {
        authorization_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
        token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
        revocation_endpoint: Some(GOOGLE_REVOKE_ENDPOINT.to_string()),
        scopes: GOOGLE_SCOPES.iter().map(|s| s.to_string()).collect(),
        client_id: registration.client_id.clone(),
        client_secret: registration.client_secret.clone(),
        redirect_uri: registration.redirect_uri.clone(),
    }
}

impl GoogleConnector {
    pub fn new(registration: &ClientRegistration, auth: Option<&PersistedCredential>) -> Self {
        Self::from_issuer(issuer_for(registration), auth)
    }

    /// Builds a connector against custom endpoints.
    pub fn from_issuer(issuer: Issuer, auth: Option<&PersistedCredential>) -> Self {
        let tokens = match auth {
            Some(persisted) => {
                TokenStore::with_credential(issuer, Credential::from_persisted(persisted))
            }
            None => TokenStore::new(issuer),
        };
        Self {
            tokens,
            client: GoogleCalendarClient::new(),
            primary_email: std::sync::Mutex::new(None),
            connection_error: AtomicBool::new(false),
        }
    }

    /// Overrides the calendar API base URL, for tests and proxies.
    #[must_use]
    pub fn with_api_base(mut self, base_url: impl Into<String>) -> Self {
        self.client = GoogleCalendarClient::new().with_base_url(base_url);
        self
    }

    pub async fn connect(&self, flow: &dyn AuthorizationFlow) -> ProviderResult<Option<String>> {
        self.tokens.connect(flow).await
    }

    pub async fn revoke(&self) -> ProviderResult<()> {
        self.tokens.revoke().await
    }

    pub fn to_config(&self) -> ServiceConfig {
        ServiceConfig {
            provider: ProviderKind::Google,
            auth: self.tokens.credential().to_persisted(),
        }
    }

    /// Fetches and normalizes today's events across all visible calendars.
    pub async fn get_next_meetings(&self) -> FetchOutcome {
        let token = match self.tokens.get_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                if self.tokens.last_error() {
                    error!("Google grant rejected, connector needs a fresh sign-in");
                    return FetchOutcome::AuthRevoked;
                }
                // Never connected; nothing to fetch, but not an error.
                return FetchOutcome::Events(Vec::new());
            }
            Err(err) if err.is_network() => {
                self.note_connection_error();
                return FetchOutcome::NetworkDown;
            }
            Err(err) => {
                error!(error = %err, "token refresh failed");
                return FetchOutcome::Events(Vec::new());
            }
        };

        let calendars = match self.client.list_calendars(&token).await {
            Ok(calendars) => calendars,
            Err(ProviderError::Network(err)) => {
                warn!(error = %err, "calendar list fetch failed");
                self.note_connection_error();
                return FetchOutcome::NetworkDown;
            }
            Err(ProviderError::Authentication(body)) => {
                error!(body = %body, "calendar list request rejected");
                return FetchOutcome::AuthRevoked;
            }
            Err(err) => {
                error!(error = %err, "calendar list request failed");
                return FetchOutcome::Events(Vec::new());
            }
        };

        // The primary entry's id is the account's email address; remember
        // it across rounds.
        if let Some(email) = calendars.iter().find(|c| c.primary).map(|c| c.id.clone()) {
            *self.primary_email.lock().unwrap() = Some(email);
        }
        let primary_email = self.primary_email.lock().unwrap().clone().unwrap_or_default();

        let calendar_ids: Vec<String> = calendars
            .into_iter()
            .filter(|calendar| !calendar.hidden && calendar.selected)
            .map(|calendar| {
                if calendar.primary {
                    PRIMARY_CALENDAR_ID.to_string()
                } else {
                    calendar.id
                }
            })
            .collect();

        let (time_min, time_max) = local_day_window(Local::now());
        debug!(
            calendars = calendar_ids.len(),
            %time_min,
            %time_max,
            "fetching events"
        );

        let client = &self.client;
        let token = &token;
        let fetches = calendar_ids.iter().map(|calendar_id| async move {
            let result = client
                .list_events(token, calendar_id, time_min, time_max)
                .await;
            (calendar_id.as_str(), result)
        });
        let results = join_all(fetches).await;

        let mut merged: HashMap<String, CanonicalEvent> = HashMap::new();
        let mut network_down = false;
        let mut auth_revoked = false;
        for (calendar_id, result) in results {
            let items = match result {
                Ok(items) => items,
                Err(ProviderError::Network(err)) => {
                    warn!(calendar = calendar_id, error = %err, "event fetch failed");
                    network_down = true;
                    continue;
                }
                Err(ProviderError::Authentication(body)) => {
                    error!(calendar = calendar_id, body = %body, "event fetch rejected");
                    auth_revoked = true;
                    continue;
                }
                Err(err) => {
                    error!(calendar = calendar_id, error = %err, "event fetch failed");
                    continue;
                }
            };
            let is_primary = calendar_id == PRIMARY_CALENDAR_ID;
            for item in items {
                // The main calendar still lists invitations the user
                // declined; hide those.
                if is_primary && declined_by_self(&item) {
                    continue;
                }
                let Some(mut event) = parse_google_calendar_result(&item, &primary_email) else {
                    continue;
                };
                event.calendar_id = calendar_id.to_string();
                event.service_id = ProviderKind::Google.as_str().to_string();
                match merged.entry(event.id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(event);
                    }
                    // Shared events appear on several calendars; the
                    // primary calendar's copy wins.
                    Entry::Occupied(mut slot) => {
                        if is_primary {
                            slot.insert(event);
                        }
                    }
                }
            }
        }

        if auth_revoked {
            return FetchOutcome::AuthRevoked;
        }
        if network_down {
            self.note_connection_error();
            return FetchOutcome::NetworkDown;
        }
        self.note_connected();

        let mut events: Vec<CanonicalEvent> = merged.into_values().collect();
        events.sort_by_key(CanonicalEvent::schedule_key);
        FetchOutcome::Events(events)
    }

    fn note_connection_error(&self) {
        if !self.connection_error.swap(true, Ordering::SeqCst) {
            warn!(service = "google", status = "error", "provider unreachable");
        }
    }

    fn note_connected(&self) {
        if self.connection_error.swap(false, Ordering::SeqCst) {
            info!(service = "google", status = "connected", "provider connection restored");
        }
    }
}

/// Whether the signed-in user declined this invitation.
fn declined_by_self(event: &ApiEvent) -> bool {
    event.attendees.as_ref().is_some_and(|attendees| {
        !attendees.is_empty()
            && !attendees
                .iter()
                .any(|a| a.is_self && a.response_status.as_deref() != Some("declined"))
    })
}
