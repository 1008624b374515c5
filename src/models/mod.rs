//! Core domain types shared across the decoder, resolution engine, relay
//! engine and web layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod guide;

pub use guide::{
    EpisodeNum, Guide, GuideChannel, GuideProgramme, Icon, Localized, PreviouslyShown, Rating,
    Subtitles,
};

/// A single channel record decoded from an M3U playlist.
///
/// Immutable once emitted to the resolution engine. `tags` carries the
/// `tvg-id` identifier, group/display fields and the logo reference; keys
/// are lowercased by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Display name (the free text after the final comma of the EXTINF line)
    pub name: String,
    /// Duration in seconds; 0 for live/unknown streams
    pub duration: f64,
    /// EXTINF attributes with lowercased keys
    pub tags: HashMap<String, String>,
    /// Stream source URL; `None` for a record that ended without a URL line
    pub url: Option<Url>,
    /// The raw EXTINF line, reproduced verbatim when rendering
    pub raw: String,
    /// Line number of the EXTINF line in the source document
    pub line: usize,
}

impl Channel {
    /// The channel identifier used for identifier-based deduplication.
    /// Empty or absent identifiers cannot participate in dedup.
    pub fn tvg_id(&self) -> Option<&str> {
        self.tags.get("tvg-id").map(String::as_str).filter(|id| !id.is_empty())
    }
}

/// The channel attribute a filter rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    /// Match against the `tvg-id` tag
    Id,
    /// Match against the `group-title` tag
    Group,
    /// Match against the `tvg-name` tag
    Name,
}

impl FilterField {
    /// The EXTINF tag this selector resolves to.
    pub fn tag(self) -> &'static str {
        match self {
            FilterField::Id => "tvg-id",
            FilterField::Group => "group-title",
            FilterField::Name => "tvg-name",
        }
    }
}

/// A compiled inclusion rule. Rule order in the configured list is
/// significant: lower ordinal means higher priority.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub pattern: Regex,
    pub field: FilterField,
}

/// A tracked in-flight stream request, listed by the debug endpoint.
///
/// Registered before the admission gate; the channel name and logo are
/// filled in once the channel index has been resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSession {
    pub client_addr: String,
    pub channel_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub started_at: DateTime<Utc>,
}
