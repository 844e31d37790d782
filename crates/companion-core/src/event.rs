//! Canonical event types shared by all service connectors.
//!
//! Connectors normalize their provider-specific payloads into
//! [`CanonicalEvent`] before anything else in the pipeline sees them, so
//! downstream code never deals with wire formats.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The calendar provider behind a service connector.
///
/// This is a closed set: adding a provider means adding a variant together
/// with its connector, endpoint table and payload parser. Persisted config
/// entries with a type outside this set are skipped on load, which keeps
/// stored config forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
}

impl ProviderKind {
    /// The wire name used in persisted config and commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a persisted service type does not name a known provider.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown provider type: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// An attendee's answer to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Accepted,
    Declined,
    Tentative,
    NeedsAction,
    #[default]
    Unknown,
}

impl ResponseStatus {
    /// Maps a Google `responseStatus` string; anything unrecognized becomes
    /// [`ResponseStatus::Unknown`].
    pub fn from_wire(value: &str) -> Self {
        match value {
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            "tentative" => Self::Tentative,
            "needsAction" => Self::NeedsAction,
            _ => Self::Unknown,
        }
    }
}

/// A participant on an event: attendee, organizer or creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPerson {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Whether this entry is the signed-in account. Secondary calendars
    /// report their own identity, so connectors re-mark this against the
    /// account's primary email.
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub response_status: ResponseStatus,
}

impl EventPerson {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            is_self: false,
            response_status: ResponseStatus::Unknown,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_self(mut self, is_self: bool) -> Self {
        self.is_self = is_self;
        self
    }

    #[must_use]
    pub fn with_response(mut self, status: ResponseStatus) -> Self {
        self.response_status = status;
        self
    }
}

/// How a link entry should be treated by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// A video-call join URL. Excluded from an event's link list; the
    /// resolved [`ConferenceDetails`] carries it instead.
    Conferencing,
    /// Anything else worth surfacing: documents, attachments, plain URLs.
    Other,
}

/// A link extracted from an event description or attachment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    pub url: String,
    /// Display text, kept only when it differs from the URL itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub kind: LinkKind,
}

impl EventLink {
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: None,
            kind: LinkKind::Other,
        }
    }

    pub fn conferencing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: None,
            kind: LinkKind::Conferencing,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn is_conferencing(&self) -> bool {
        self.kind == LinkKind::Conferencing
    }
}

/// Resolved video-conferencing info for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceDetails {
    pub icon: String,
    pub name: String,
    pub url: String,
}

/// A provider-agnostic calendar event.
///
/// Built once by a connector's normalizer and treated as immutable from
/// then on. Serializes to the shape published under the `events` store key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    /// The provider's own event id, before any dedup rewriting.
    pub original_id: String,
    pub summary: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_all_day: bool,
    /// Deep link into the provider's own UI, already scoped to the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<EventPerson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<EventPerson>,
    #[serde(default)]
    pub attendees: Vec<EventPerson>,
    /// Non-conferencing links only; the join URL lives in `conference`.
    #[serde(default)]
    pub links: Vec<EventLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference: Option<ConferenceDetails>,
    pub calendar_id: String,
    pub service_type: ProviderKind,
    pub service_id: String,
}

impl CanonicalEvent {
    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// Ordering key for merged event lists: start time, then shorter
    /// events first.
    pub fn schedule_key(&self) -> (DateTime<Utc>, Duration) {
        (self.start_date, self.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(start_hour: u32, end_hour: u32) -> CanonicalEvent {
        CanonicalEvent {
            id: "evt1".to_string(),
            original_id: "evt1".to_string(),
            summary: "Standup".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 3, 4, start_hour, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 3, 4, end_hour, 0, 0).unwrap(),
            is_all_day: false,
            url: None,
            creator: None,
            organizer: None,
            attendees: Vec::new(),
            links: Vec::new(),
            conference: None,
            calendar_id: "primary".to_string(),
            service_type: ProviderKind::Google,
            service_id: "google".to_string(),
        }
    }

    mod provider_kind {
        use super::*;

        #[test]
        fn round_trips_through_wire_name() {
            assert_eq!("google".parse::<ProviderKind>(), Ok(ProviderKind::Google));
            assert_eq!(ProviderKind::Google.as_str(), "google");
        }

        #[test]
        fn rejects_unknown_types() {
            let err = "exchange".parse::<ProviderKind>().unwrap_err();
            assert_eq!(err, UnknownProvider("exchange".to_string()));
        }

        #[test]
        fn serializes_lowercase() {
            let json = serde_json::to_string(&ProviderKind::Google).unwrap();
            assert_eq!(json, "\"google\"");
        }
    }

    mod response_status {
        use super::*;

        #[test]
        fn maps_wire_values() {
            assert_eq!(ResponseStatus::from_wire("accepted"), ResponseStatus::Accepted);
            assert_eq!(ResponseStatus::from_wire("declined"), ResponseStatus::Declined);
            assert_eq!(
                ResponseStatus::from_wire("needsAction"),
                ResponseStatus::NeedsAction
            );
            assert_eq!(ResponseStatus::from_wire("???"), ResponseStatus::Unknown);
        }
    }

    mod links {
        use super::*;

        #[test]
        fn conferencing_links_are_flagged() {
            let link = EventLink::conferencing("https://zoom.us/j/123");
            assert!(link.is_conferencing());
            assert!(!EventLink::plain("https://example.com").is_conferencing());
        }

        #[test]
        fn text_is_skipped_when_absent() {
            let json = serde_json::to_value(EventLink::plain("https://example.com")).unwrap();
            assert!(json.get("text").is_none());
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn schedule_key_sorts_by_start_then_duration() {
            let long = event(9, 12);
            let short = event(9, 10);
            let later = event(10, 11);

            let mut events = vec![long.clone(), later.clone(), short.clone()];
            events.sort_by_key(CanonicalEvent::schedule_key);

            assert_eq!(events[0].duration(), short.duration());
            assert_eq!(events[1].duration(), long.duration());
            assert_eq!(events[2].start_date, later.start_date);
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn uses_camel_case_keys() {
            let json = serde_json::to_value(event(9, 10)).unwrap();
            assert!(json.get("startDate").is_some());
            assert!(json.get("originalId").is_some());
            assert_eq!(json["serviceType"], "google");
        }
    }
}
