//! Upstream source handling: playlist decoding, guide filtering and the
//! URL-or-path fetcher both of them read from.

pub mod fetch;
pub mod m3u;
pub mod xmltv;

use url::Url;

/// Whether a line is a syntactically valid absolute URL (scheme and host).
pub fn is_url(input: &str) -> bool {
    Url::parse(input).map(|url| url.has_host()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_absolute_urls() {
        assert!(is_url("http://example.com/stream"));
        assert!(is_url("https://example.com:8080/live/1.ts"));
        assert!(is_url("rtsp://10.0.0.1/cam"));
    }

    #[test]
    fn rejects_non_urls() {
        assert!(!is_url("#EXTINF:-1,Channel"));
        assert!(!is_url("Channel 4"));
        assert!(!is_url("/var/lib/playlist.m3u"));
        assert!(!is_url("mailto:user@example.com"));
    }
}
