//! Streaming M3U playlist decoder.
//!
//! The decoder walks the document line by line and drives a
//! [`PlaylistHandler`] with one callback per decoded channel, so consumers
//! can filter incrementally instead of materializing the full playlist
//! twice. The only decoder state is the single in-flight record.

use std::collections::HashMap;
use std::io::BufRead;

use regex::Regex;
use url::Url;

use crate::errors::PlaylistError;
use crate::models::Channel;

use super::is_url;

/// Callbacks driven by [`PlaylistDecoder::decode`], in document order.
/// `on_playlist_end` fires exactly once, and only on success.
pub trait PlaylistHandler {
    fn on_playlist_start(&mut self);
    fn on_channel(&mut self, channel: Channel);
    fn on_playlist_end(&mut self);
}

const HEADER_MARKER: &str = "#EXTM3U";
const RECORD_MARKER: &str = "#EXTINF:";

/// Line-oriented M3U decoder.
pub struct PlaylistDecoder {
    attr_re: Regex,
}

impl Default for PlaylistDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistDecoder {
    pub fn new() -> Self {
        // key="quoted value" or key=123 (bare values must be numeric)
        let attr_re =
            Regex::new(r#"([^\s="]+)=(?:"([^"]*)"|(\d+))"#).expect("attribute pattern is valid");
        Self { attr_re }
    }

    /// Decode a playlist, emitting each channel through `handler`.
    ///
    /// The document must begin with `#EXTM3U`; a URL line with no open
    /// record and an unparseable duration are fatal. An open record at end
    /// of input is still emitted (lenient trailing-record policy).
    pub fn decode<R, H>(&self, reader: R, handler: &mut H) -> Result<(), PlaylistError>
    where
        R: BufRead,
        H: PlaylistHandler,
    {
        handler.on_playlist_start();

        let mut current: Option<Channel> = None;

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = line?;
            let line = line.trim();

            if line_number == 1 && !line.starts_with(HEADER_MARKER) {
                return Err(PlaylistError::MissingHeader);
            }

            if line.starts_with(RECORD_MARKER) {
                if let Some(open) = current.take() {
                    handler.on_channel(open);
                }
                let (duration, name, tags) = self.parse_extinf(line, line_number)?;
                current = Some(Channel {
                    name,
                    duration,
                    tags,
                    url: None,
                    raw: line.to_string(),
                    line: line_number,
                });
            } else if is_url(line) {
                let Some(mut channel) = current.take() else {
                    return Err(PlaylistError::UrlBeforeExtinf { line: line_number });
                };
                channel.url = Url::parse(line).ok();
                handler.on_channel(channel);
            }
        }

        if let Some(open) = current.take() {
            handler.on_channel(open);
        }

        handler.on_playlist_end();

        Ok(())
    }

    /// Split an `#EXTINF:` line into duration, display name and attributes.
    fn parse_extinf(
        &self,
        line: &str,
        line_number: usize,
    ) -> Result<(f64, String, HashMap<String, String>), PlaylistError> {
        let body = &line[RECORD_MARKER.len()..];

        let (meta, title) = match body.rfind(',') {
            Some(comma) => (&body[..comma], body[comma + 1..].trim()),
            None => (body, ""),
        };

        // The duration is whatever leading run of sign/digit/dot characters
        // follows the marker; -1 or an empty field means live/unknown.
        let duration_end = meta
            .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
            .unwrap_or(meta.len());
        let duration_str = meta[..duration_end].trim();
        let duration = if duration_str.is_empty() || duration_str == "-1" {
            0.0
        } else {
            duration_str
                .parse::<f64>()
                .map_err(|source| PlaylistError::InvalidDuration {
                    line: line_number,
                    value: duration_str.to_string(),
                    source,
                })?
        };

        let mut tags = HashMap::new();
        for caps in self.attr_re.captures_iter(&meta[duration_end..]) {
            let key = caps[1].to_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            tags.insert(key, value);
        }

        Ok((duration, title.to_string(), tags))
    }
}
