//! Link extraction and conferencing detection for event descriptions.
//!
//! Calendar descriptions arrive as HTML with entity-mangled URLs. This
//! module pulls usable links out of them:
//! - Anchor tags with visible text are collected first, then bare URLs
//!   from the remaining text.
//! - Known video-call hosts (Zoom, Teams, Meet, ...) are tagged as
//!   conferencing links so they can be promoted to [`ConferenceDetails`]
//!   instead of cluttering the link list.
//! - A small ignore list drops links that carry no value in a companion
//!   UI, like `tel:` URIs and the Teams "how to join" help pages.
//!
//! # Example
//!
//! ```
//! use companion_core::links::extract_links;
//!
//! let links = extract_links(r#"Agenda: <a href="https://example.com/doc">notes</a>"#);
//! assert_eq!(links.len(), 1);
//! assert_eq!(links[0].text.as_deref(), Some("notes"));
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::event::{ConferenceDetails, EventLink};

/// Regex for bare URLs in text. Also matches scheme-less `www.` / `ftp.`
/// candidates, which get an `https://` prefix during processing.
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:(?:https?|ftp|file)://|www\.|ftp\.)[-A-Z0-9+&@#/%=~_|$?!:,.]*[A-Z0-9+&@#/%=~_|$]")
        .expect("Invalid URL regex")
});

/// Regex for HTML anchors with an href attribute.
static ANCHOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#)
        .expect("Invalid anchor regex")
});

/// Regex for stripping markup from anchor text.
static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));

/// Links that provide nothing useful in the companion UI.
static IGNORED_LINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^tel:",
        r"^https://aka\.ms/JoinTeamsMeeting",
        r"^https://www\.microsoft\.com/microsoft-teams/join-a-meeting",
        r"^https://www\.microsoft\.com/.*/microsoft-teams/download-app",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid ignore pattern"))
    .collect()
});

struct ConferencingService {
    name: &'static str,
    /// Host suffix to match. A leading dot restricts the match to
    /// subdomains of the service.
    domain: &'static str,
    icon: &'static str,
}

const CONFERENCING_SERVICES: &[ConferencingService] = &[
    ConferencingService {
        name: "Zoom",
        domain: "zoom.us",
        icon: "icons/zoom.svg",
    },
    ConferencingService {
        name: "Teams",
        domain: "teams.microsoft.com",
        icon: "icons/teams.png",
    },
    ConferencingService {
        name: "Meet",
        domain: "meet.google.com",
        icon: "icons/meet.png",
    },
    ConferencingService {
        name: "Jitsi",
        domain: "meet.jit.si",
        icon: "icons/jitsi.png",
    },
    ConferencingService {
        name: "GoToMeeting",
        domain: ".gotomeeting.com",
        icon: "icons/gotomeeting.png",
    },
    ConferencingService {
        name: "WebEx",
        domain: ".webex.com",
        icon: "icons/webex.png",
    },
    ConferencingService {
        name: "Skype",
        domain: ".skype.com",
        icon: "icons/skype.svg",
    },
];

/// Parses a URL candidate, retrying scheme-less values as `https://`.
fn parse_candidate(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .ok()
        .or_else(|| Url::parse(&format!("https://{raw}")).ok())
}

fn conferencing_service(host: &str) -> Option<&'static ConferencingService> {
    CONFERENCING_SERVICES
        .iter()
        .find(|service| host.ends_with(service.domain))
}

/// Turns one URL candidate into a link entry.
///
/// Returns `None` for unparseable or ignored URLs. Conferencing hosts are
/// tagged; other links keep their display text only when it differs from
/// the resolved URL.
pub fn link_for(raw: &str, text: Option<&str>) -> Option<EventLink> {
    let url = parse_candidate(raw)?;
    let href = url.as_str();
    if IGNORED_LINKS.iter().any(|pattern| pattern.is_match(href)) {
        return None;
    }
    if let Some(host) = url.host_str() {
        if conferencing_service(host).is_some() {
            return Some(EventLink::conferencing(href));
        }
    }
    let mut link = EventLink::plain(href);
    if let Some(text) = text {
        if !text.is_empty() && text != href {
            link = link.with_text(text);
        }
    }
    Some(link)
}

/// Extracts all links from an HTML event description.
///
/// Anchors win over bare URLs: a bare URL that matches an anchor's text or
/// repeats an already-collected URL is dropped. Providers entity-encode
/// ampersands and sprinkle `<wbr>` tags inside long URLs, so those are
/// undone before matching.
pub fn extract_links(description: &str) -> Vec<EventLink> {
    let description = description
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace("<wbr>", "");

    let mut links = Vec::new();
    let mut seen_urls = HashSet::new();
    let mut anchor_text = HashSet::new();

    for caps in ANCHOR_REGEX.captures_iter(&description) {
        let href = &caps[1];
        let text = TAG_REGEX.replace_all(&caps[2], "").trim().to_string();
        // Anchors without visible text would not show up in a calendar UI
        // either.
        if href.is_empty() || text.is_empty() {
            continue;
        }
        if let Some(link) = link_for(href, Some(&text)) {
            anchor_text.insert(text);
            if seen_urls.insert(link.url.clone()) {
                links.push(link);
            }
        }
    }

    for candidate in URL_REGEX.find_iter(&description) {
        let candidate = candidate.as_str();
        if anchor_text.contains(candidate) {
            continue;
        }
        if let Some(link) = link_for(candidate, None) {
            if seen_urls.insert(link.url.clone()) {
                links.push(link);
            }
        }
    }

    links
}

/// Looks up conferencing branding for a join URL.
///
/// Returns `None` when the host is not a known conferencing service.
pub fn conference_details_for_url(raw: &str) -> Option<ConferenceDetails> {
    let url = parse_candidate(raw)?;
    let host = url.host_str()?;
    conferencing_service(host).map(|service| ConferenceDetails {
        icon: service.icon.to_string(),
        name: service.name.to_string(),
        url: url.to_string(),
    })
}
