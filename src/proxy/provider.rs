//! Channel resolution engine.
//!
//! [`Lineup`] consumes decoder callbacks and applies the ordered inclusion
//! rules: first matching, highest-configured-precedence rule wins a
//! channel's slot, deduplicated by display name with identifier-aware "HD"
//! promotion. [`Provider`] owns the configured sources and republishes an
//! immutable [`Snapshot`] after each successful refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{Channel, FilterRule};
use crate::sources::fetch::fetch_source;
use crate::sources::m3u::{PlaylistDecoder, PlaylistHandler};
use crate::sources::xmltv::filter_guide;

/// One published resolution result. Replaced wholesale on refresh; readers
/// hold an `Arc` and observe either the old or the new snapshot, never a
/// partially built one. The index into `channels` is the public channel
/// identifier used in stream URLs.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub channels: Vec<Channel>,
    pub playlist: String,
    pub guide: String,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Builds the channel table and rendered playlist during one decode pass.
///
/// The name-to-priority map is scoped to a single pass and discarded with
/// the builder.
pub struct Lineup {
    rules: Arc<Vec<FilterRule>>,
    base_address: Option<String>,
    channels: Vec<Channel>,
    priorities: HashMap<String, usize>,
    playlist: String,
}

impl Lineup {
    pub fn new(rules: Arc<Vec<FilterRule>>, base_address: Option<String>) -> Self {
        Self {
            rules,
            base_address,
            channels: Vec::new(),
            priorities: HashMap::new(),
            playlist: String::new(),
        }
    }

    /// The resolved channel table and rendered playlist text.
    pub fn into_parts(self) -> (Vec<Channel>, String) {
        (self.channels, self.playlist)
    }

    /// Index of an existing table entry sharing this record's non-empty
    /// `tvg-id`, if any.
    fn find_index_with_id(&self, channel: &Channel) -> Option<usize> {
        let id = channel.tvg_id()?;
        self.channels
            .iter()
            .position(|existing| existing.tvg_id() == Some(id))
    }
}

impl PlaylistHandler for Lineup {
    fn on_playlist_start(&mut self) {
        self.channels.clear();
        self.priorities.clear();
        self.playlist.clear();
        self.playlist.push_str("#EXTM3U\n");
    }

    fn on_channel(&mut self, channel: Channel) {
        let rules = Arc::clone(&self.rules);
        for (priority, rule) in rules.iter().enumerate() {
            let value = match channel.tags.get(rule.field.tag()) {
                Some(value) if !value.is_empty() => value,
                _ => continue,
            };
            if !rule.pattern.is_match(value) {
                continue;
            }

            let name = channel.name.clone();

            if channel.tvg_id().is_none() {
                warn!(
                    channel = %name,
                    line = channel.line,
                    "channel has no tvg-id and cannot participate in dedup"
                );
            }

            let existing = self.priorities.get(&name).copied();
            match existing {
                Some(current) if current <= priority => {
                    warn!(channel = %name, rule = priority, "duplicate channel name");
                }
                _ => {
                    if let Some(index) = self.find_index_with_id(&channel) {
                        if name.contains("HD") {
                            // Promote the HD variant into the slot its SD
                            // sibling already won; the old name binding goes
                            // so the slot's priority is not double-counted.
                            let replaced =
                                std::mem::replace(&mut self.channels[index], channel.clone());
                            self.priorities.remove(&replaced.name);
                            debug!(
                                channel = %name,
                                replaces = %replaced.name,
                                "promoted HD variant"
                            );
                        } else {
                            // Same identifier already admitted under another
                            // name; keep the existing entry.
                            continue;
                        }
                    } else if existing.is_none() {
                        self.channels.push(channel.clone());
                    }
                    self.priorities.insert(name, priority);
                }
            }
        }
    }

    fn on_playlist_end(&mut self) {
        let Self {
            channels,
            priorities,
            playlist,
            base_address,
            ..
        } = self;

        // Entries that never matched a rule cannot normally reach the table,
        // but sort them to the tail anyway, keeping their relative order.
        channels.sort_by_key(|channel| {
            priorities
                .get(&channel.name)
                .copied()
                .unwrap_or(usize::MAX)
        });

        for (index, channel) in channels.iter().enumerate() {
            playlist.push_str(&channel.raw);
            playlist.push('\n');
            match (base_address.as_deref(), &channel.url) {
                (Some(base), _) => {
                    playlist.push_str(&format!("http://{base}/channel/{index}\n"));
                }
                (None, Some(url)) => {
                    playlist.push_str(url.as_str());
                    playlist.push('\n');
                }
                (None, None) => {}
            }
        }
    }
}

/// Owns the configured sources and the published snapshot.
pub struct Provider {
    playlist_url: String,
    guide_url: String,
    base_address: Option<String>,
    rules: Arc<Vec<FilterRule>>,
    decoder: PlaylistDecoder,
    client: reqwest::Client,
    state: RwLock<Arc<Snapshot>>,
}

impl Provider {
    pub fn new(config: &Config, rules: Vec<FilterRule>) -> Self {
        // Rewriting only makes sense when the relay path is enabled;
        // otherwise clients keep the original source URLs.
        let base_address = config
            .relay
            .enabled
            .then(|| config.server_address.clone());

        Self {
            playlist_url: config.playlist_url.clone(),
            guide_url: config.guide_url.clone(),
            base_address,
            rules: Arc::new(rules),
            decoder: PlaylistDecoder::new(),
            client: reqwest::Client::new(),
            state: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// The currently published snapshot.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().await.clone()
    }

    /// Resolve a public channel index against the current table.
    pub async fn channel(&self, index: usize) -> Option<Channel> {
        self.snapshot().await.channels.get(index).cloned()
    }

    /// Re-run resolution end to end and atomically publish the result.
    ///
    /// All-or-nothing: any fetch, decode or filter failure leaves the
    /// previously published snapshot untouched.
    pub async fn refresh(&self) -> Result<()> {
        info!(url = %self.playlist_url, "loading IPTV playlist");
        let started = std::time::Instant::now();
        let playlist_text = fetch_source(&self.client, &self.playlist_url)
            .await
            .context("fetching playlist source")?;
        debug!(elapsed = ?started.elapsed(), "loaded IPTV playlist");

        let mut lineup = Lineup::new(Arc::clone(&self.rules), self.base_address.clone());
        self.decoder
            .decode(playlist_text.as_bytes(), &mut lineup)
            .context("decoding playlist")?;
        let (channels, playlist) = lineup.into_parts();
        info!(channels = channels.len(), "resolved channel lineup");

        let known_ids: HashSet<String> = channels
            .iter()
            .filter_map(|channel| channel.tvg_id())
            .map(str::to_string)
            .collect();

        info!(url = %self.guide_url, "loading EPG guide");
        let started = std::time::Instant::now();
        let guide_text = fetch_source(&self.client, &self.guide_url)
            .await
            .context("fetching guide source")?;
        debug!(elapsed = ?started.elapsed(), "loaded EPG guide");

        let guide = filter_guide(&guide_text, &known_ids).context("filtering guide")?;
        info!(
            channels = guide.channels.len(),
            programmes = guide.programmes.len(),
            "filtered EPG guide"
        );
        let guide_xml = guide.to_xml().context("rendering guide")?;

        let snapshot = Snapshot {
            channels,
            playlist,
            guide: guide_xml,
            refreshed_at: Some(Utc::now()),
        };
        *self.state.write().await = Arc::new(snapshot);

        Ok(())
    }
}
