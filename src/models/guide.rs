//! XMLTV guide document model.
//!
//! Only the fields the proxy actually republishes are modelled; unknown
//! sub-elements are skipped during decoding. This mirrors the streaming
//! parser approach: the full foreign document is never materialized, one
//! element is decoded at a time.

/// Text content with an optional `lang` attribute, used for display names,
/// titles, descriptions and similar localized elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Localized {
    pub value: String,
    pub lang: Option<String>,
}

/// An `<icon src="..."/>` reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Icon {
    pub src: String,
    pub width: Option<String>,
    pub height: Option<String>,
}

/// An `<episode-num system="...">` entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeNum {
    pub system: Option<String>,
    pub value: String,
}

/// A `<rating>` or `<star-rating>` entry with its nested `<value>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rating {
    pub system: Option<String>,
    pub value: String,
}

/// A `<previously-shown/>` marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviouslyShown {
    pub start: Option<String>,
    pub channel: Option<String>,
}

/// A `<subtitles/>` marker with its `type` attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subtitles {
    pub kind: Option<String>,
}

/// Channel metadata from the guide document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideChannel {
    pub id: String,
    pub display_names: Vec<Localized>,
    pub icons: Vec<Icon>,
    pub urls: Vec<String>,
}

/// A programme schedule entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideProgramme {
    pub start: String,
    pub stop: Option<String>,
    pub channel: String,
    pub titles: Vec<Localized>,
    pub sub_titles: Vec<Localized>,
    pub descs: Vec<Localized>,
    pub date: Option<String>,
    pub categories: Vec<Localized>,
    pub language: Option<Localized>,
    pub orig_language: Option<Localized>,
    pub icons: Vec<Icon>,
    pub urls: Vec<String>,
    pub countries: Vec<Localized>,
    pub episode_nums: Vec<EpisodeNum>,
    pub previously_shown: Option<PreviouslyShown>,
    pub premiere: bool,
    pub new: bool,
    pub subtitles: Vec<Subtitles>,
    pub ratings: Vec<Rating>,
    pub star_ratings: Vec<Rating>,
}

/// A filtered guide document: header metadata plus the channel and
/// programme entries whose identifiers are present in the current channel
/// table. Immutable once published; replaced wholesale on refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guide {
    pub date: Option<String>,
    pub source_info_url: Option<String>,
    pub source_info_name: Option<String>,
    pub source_data_url: Option<String>,
    pub generator_info_name: Option<String>,
    pub generator_info_url: Option<String>,
    pub channels: Vec<GuideChannel>,
    pub programmes: Vec<GuideProgramme>,
}
