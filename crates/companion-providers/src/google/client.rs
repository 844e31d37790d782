//! Low-level Google Calendar API v3 client.
//!
//! Thin HTTP wrapper plus the serde mirror of the wire format. Status
//! triage happens here: 401 becomes [`ProviderError::Authentication`]
//! (the grant is dead), transport failures become
//! [`ProviderError::Network`], anything else non-OK becomes
//! [`ProviderError::Api`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{ProviderError, ProviderResult};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GoogleCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleCalendarClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL, for tests and proxies.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `GET /users/me/calendarList`
    pub async fn list_calendars(&self, token: &str) -> ProviderResult<Vec<ApiCalendarListEntry>> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("calendar list request failed: {e}")))?;
        let list: ApiCalendarList = Self::decode(response).await?;
        Ok(list.items)
    }

    /// `GET /calendars/{id}/events` over `[time_min, time_max)`, with
    /// recurrences expanded and ordered by start time.
    pub async fn list_events(
        &self,
        token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ProviderResult<Vec<ApiEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        );
        let query: Vec<(&str, String)> = vec![
            ("timeMin", time_min.to_rfc3339()),
            ("timeMax", time_max.to_rfc3339()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("event fetch failed: {e}")))?;
        let list: ApiEventList = Self::decode(response).await?;
        Ok(list.items)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("reading response body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("decoding response: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ApiCalendarList {
    #[serde(default)]
    items: Vec<ApiCalendarListEntry>,
}

/// One entry from the user's calendar list. The primary entry's id is the
/// account's email address.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub selected: bool,
}

#[derive(Debug, Deserialize)]
struct ApiEventList {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<ApiEventTime>,
    #[serde(default)]
    pub end: Option<ApiEventTime>,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub attendees: Option<Vec<ApiAttendee>>,
    #[serde(default)]
    pub organizer: Option<ApiPerson>,
    #[serde(default)]
    pub creator: Option<ApiPerson>,
    #[serde(default)]
    pub conference_data: Option<ApiConferenceData>,
    #[serde(default)]
    pub attachments: Option<Vec<ApiAttachment>>,
}

/// Either a concrete instant (`dateTime`) or a date-only value for events
/// created through the provider's all-day UI.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttendee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Whether this attendee is the calendar this copy of the event was
    /// read from.
    #[serde(default, rename = "self")]
    pub is_self: bool,
    #[serde(default)]
    pub organizer: bool,
    #[serde(default)]
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPerson {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "self")]
    pub is_self: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConferenceData {
    #[serde(default)]
    pub conference_solution: Option<ApiConferenceSolution>,
    #[serde(default)]
    pub entry_points: Vec<ApiEntryPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConferenceSolution {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEntryPoint {
    #[serde(default)]
    pub entry_point_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// A Drive attachment on an event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttachment {
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_a_calendar_list() {
        let json = r#"{
            "kind": "calendar#calendarList",
            "items": [
                {"id": "alice@example.com", "summary": "Alice", "primary": true, "selected": true},
                {"id": "team@group.calendar.google.com", "summary": "Team", "selected": true},
                {"id": "holidays@group.v.calendar.google.com", "hidden": true}
            ]
        }"#;
        let list: ApiCalendarList = serde_json::from_str(json).unwrap();
        assert_eq!(list.items.len(), 3);
        assert!(list.items[0].primary);
        assert!(list.items[0].selected);
        assert!(!list.items[1].primary);
        assert!(list.items[2].hidden);
        assert!(!list.items[2].selected);
    }

    #[test]
    fn parses_a_full_event() {
        let json = r#"{
            "id": "evt1",
            "summary": "Design review",
            "description": "Notes: https://example.com/doc",
            "htmlLink": "https://www.google.com/calendar/event?eid=abc",
            "start": {"dateTime": "2024-03-04T10:00:00-05:00", "timeZone": "America/New_York"},
            "end": {"dateTime": "2024-03-04T11:00:00-05:00"},
            "attendees": [
                {"email": "alice@example.com", "self": true, "responseStatus": "accepted"},
                {"email": "bob@example.com", "displayName": "Bob", "responseStatus": "declined"}
            ],
            "organizer": {"email": "bob@example.com", "displayName": "Bob"},
            "creator": {"email": "alice@example.com", "self": true},
            "conferenceData": {
                "conferenceSolution": {"name": "Google Meet", "iconUri": "https://example.com/meet.png"},
                "entryPoints": [
                    {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"},
                    {"entryPointType": "phone", "uri": "tel:+15551234567"}
                ]
            },
            "attachments": [
                {"fileUrl": "https://drive.google.com/file/d/xyz", "title": "Slides"}
            ]
        }"#;
        let event: ApiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, "evt1");
        let start = event.start.unwrap().date_time.unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap());
        assert!(event.attendees.as_ref().unwrap()[0].is_self);
        assert_eq!(
            event.attendees.as_ref().unwrap()[1].response_status.as_deref(),
            Some("declined")
        );
        let conference = event.conference_data.unwrap();
        assert_eq!(conference.entry_points.len(), 2);
        assert_eq!(
            conference.entry_points[0].entry_point_type.as_deref(),
            Some("video")
        );
        assert_eq!(event.attachments.unwrap()[0].title.as_deref(), Some("Slides"));
    }

    #[test]
    fn missing_fields_default() {
        let event: ApiEvent = serde_json::from_str(r#"{"id": "bare"}"#).unwrap();
        assert!(event.start.is_none());
        assert!(event.attendees.is_none());
        assert!(event.conference_data.is_none());
    }

    #[test]
    fn parses_a_date_only_event() {
        let json = r#"{
            "id": "allday1",
            "summary": "Offsite",
            "start": {"date": "2024-03-04"},
            "end": {"date": "2024-03-05"}
        }"#;
        let event: ApiEvent = serde_json::from_str(json).unwrap();
        let start = event.start.unwrap();
        assert!(start.date_time.is_none());
        assert_eq!(start.date, Some(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()));
    }
}
