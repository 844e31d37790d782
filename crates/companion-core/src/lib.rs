//! Core types: events, links, conferencing detection, time helpers

pub mod event;
pub mod links;
pub mod time;
pub mod tracing;

pub use event::{
    CanonicalEvent, ConferenceDetails, EventLink, EventPerson, LinkKind, ProviderKind,
    ResponseStatus, UnknownProvider,
};
pub use links::{conference_details_for_url, extract_links, link_for};
pub use time::{DEFAULT_ALL_DAY_HOURS, is_all_day_span, local_day_window};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
