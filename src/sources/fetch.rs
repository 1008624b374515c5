//! URL-or-local-path source fetcher.
//!
//! Both the playlist and the guide are configured as either an HTTP(S) URL
//! or a filesystem path. Open failures and non-2xx responses are fatal to
//! the refresh attempt that requested the fetch.

use anyhow::{Context, Result};
use tracing::debug;

use super::is_url;

/// Fetch a source document as text.
pub async fn fetch_source(client: &reqwest::Client, source: &str) -> Result<String> {
    if is_url(source) {
        let response = client
            .get(source)
            .send()
            .await
            .with_context(|| format!("requesting {source}"))?
            .error_for_status()
            .with_context(|| format!("fetching {source}"))?;
        let body = response
            .text()
            .await
            .with_context(|| format!("reading response body from {source}"))?;
        debug!(source, bytes = body.len(), "fetched remote source");
        Ok(body)
    } else {
        let body = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("reading {source}"))?;
        debug!(source, bytes = body.len(), "read local source");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_local_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#EXTM3U").unwrap();

        let client = reqwest::Client::new();
        let body = fetch_source(&client, file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(body, "#EXTM3U\n");
    }

    #[tokio::test]
    async fn missing_local_file_is_an_error() {
        let client = reqwest::Client::new();
        let err = fetch_source(&client, "/nonexistent/playlist.m3u")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/playlist.m3u"));
    }
}
