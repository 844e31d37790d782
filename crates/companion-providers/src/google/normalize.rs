//! Mapping from Google event payloads to [`CanonicalEvent`].

use url::Url;

use companion_core::event::{
    CanonicalEvent, ConferenceDetails, EventLink, EventPerson, ProviderKind, ResponseStatus,
};
use companion_core::links::{conference_details_for_url, extract_links, link_for};
use companion_core::time::{DEFAULT_ALL_DAY_HOURS, is_all_day_span};

use super::client::{ApiAttachment, ApiAttendee, ApiEvent, ApiPerson};

/// Organizer addresses of shared calendars; never real participants.
const GROUP_CALENDAR_SUFFIX: &str = "@group.calendar.google.com";

fn person_from_attendee(attendee: &ApiAttendee) -> Option<EventPerson> {
    let email = attendee.email.clone()?;
    let mut person = EventPerson::new(email).with_self(attendee.is_self);
    person.display_name = attendee.display_name.clone();
    person.response_status = attendee
        .response_status
        .as_deref()
        .map(ResponseStatus::from_wire)
        .unwrap_or_default();
    Some(person)
}

fn person_from_api(person: &ApiPerson) -> Option<EventPerson> {
    let email = person.email.clone()?;
    let mut result = EventPerson::new(email).with_self(person.is_self);
    result.display_name = person.display_name.clone();
    Some(result)
}

/// Drive attachments surfaced as links. An attachment with no title would
/// render as a bare URL, so those are dropped; duplicates collapse by URL.
fn attachment_links(attachments: &[ApiAttachment]) -> Vec<EventLink> {
    let mut links: Vec<EventLink> = Vec::new();
    for attachment in attachments {
        let (Some(file_url), Some(title)) = (&attachment.file_url, &attachment.title) else {
            continue;
        };
        let Some(link) = link_for(file_url, Some(title)) else {
            continue;
        };
        if link.text.is_some() && !links.iter().any(|existing| existing.url == link.url) {
            links.push(link);
        }
    }
    links
}

/// Resolves conferencing info for an event.
///
/// Priority: the `conferenceData` video entry point (falling back to the
/// conference solution's own branding when the bridge host is not a known
/// service), then a URL found in the comma-separated `location` field,
/// then the first conferencing-tagged link from the description.
pub fn conference_info(event: &ApiEvent, links: &[EventLink]) -> Option<ConferenceDetails> {
    if let Some(data) = &event.conference_data {
        if let Some(solution) = &data.conference_solution {
            let video_uri = data
                .entry_points
                .iter()
                .filter(|entry| entry.entry_point_type.as_deref() == Some("video"))
                .find_map(|entry| entry.uri.clone());
            if let Some(uri) = video_uri {
                if let Some(details) = conference_details_for_url(&uri) {
                    return Some(details);
                }
                return Some(ConferenceDetails {
                    icon: solution.icon_uri.clone().unwrap_or_default(),
                    name: solution.name.clone().unwrap_or_default(),
                    url: uri,
                });
            }
        }
    }
    if let Some(location) = &event.location {
        // Locations can hold several comma-separated entries; the first
        // one that parses as a URL decides the outcome.
        if let Some(url) = location
            .split(',')
            .map(str::trim)
            .find_map(|part| Url::parse(part).ok())
        {
            return conference_details_for_url(url.as_str());
        }
    }
    links
        .iter()
        .find(|link| link.is_conferencing())
        .and_then(|link| conference_details_for_url(&link.url))
}

/// Normalizes one Google event.
///
/// Returns `None` for events without concrete start and end instants
/// (date-only all-day events are not supported). `primary_email` is the
/// account's primary address, used to re-mark "self" on events read from
/// secondary calendars and to scope the event's deep link.
pub fn parse_google_calendar_result(
    event: &ApiEvent,
    primary_email: &str,
) -> Option<CanonicalEvent> {
    let start = event.start.as_ref()?.date_time?;
    let end = event.end.as_ref()?.date_time?;

    let description_links = extract_links(event.description.as_deref().unwrap_or_default());
    let attachments = attachment_links(event.attachments.as_deref().unwrap_or_default());
    let conference = conference_info(event, &description_links);
    let links: Vec<EventLink> = attachments
        .into_iter()
        .chain(description_links)
        .filter(|link| !link.is_conferencing())
        .collect();

    let mut attendees: Vec<EventPerson> = event
        .attendees
        .iter()
        .flatten()
        .filter(|attendee| {
            !attendee.is_self && attendee.response_status.as_deref() != Some("declined")
        })
        .filter_map(person_from_attendee)
        .collect();

    // Whether the organizer owns the calendar this copy came from, as
    // reported by the API. Distinct from the primary-email marking below.
    let organizer_is_owner = event.organizer.as_ref().is_some_and(|o| o.is_self);
    let mut organizer = event.organizer.as_ref().and_then(person_from_api);
    let mut creator = event.creator.as_ref().and_then(person_from_api);

    // Secondary calendars carry their own identity, so re-mark "self"
    // against the account's primary address.
    if let Some(organizer) = organizer.as_mut() {
        if organizer.email == primary_email {
            organizer.is_self = true;
        }
    }
    if let Some(creator) = creator.as_mut() {
        if creator.email == primary_email {
            creator.is_self = true;
        }
    }

    // Organizers are not always listed as attendees; add them when they
    // are a real outside participant and not already present.
    if let Some(organizer) = &organizer {
        if !organizer_is_owner
            && !organizer.email.ends_with(GROUP_CALENDAR_SUFFIX)
            && !attendees.iter().any(|a| a.email == organizer.email)
        {
            attendees.push(organizer.clone());
        }
    }

    let url = event.html_link.as_ref().and_then(|link| {
        let mut url = Url::parse(link).ok()?;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "authuser")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(&pairs)
            .append_pair("authuser", primary_email);
        Some(url.into())
    });

    Some(CanonicalEvent {
        id: event.id.clone(),
        original_id: event.id.clone(),
        summary: event.summary.clone().unwrap_or_default(),
        start_date: start,
        end_date: end,
        is_all_day: is_all_day_span(start, end, DEFAULT_ALL_DAY_HOURS),
        url,
        creator,
        organizer,
        attendees,
        links,
        conference,
        calendar_id: String::new(),
        service_type: ProviderKind::Google,
        service_id: String::new(),
    })
}
