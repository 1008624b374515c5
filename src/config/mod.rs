//! Configuration loading and validation.
//!
//! Configuration is a TOML file. Everything that can be rejected up front
//! is rejected here: missing sources, unparseable filter patterns, an
//! unrecognized filter field selector (refused by serde) and a bad refresh
//! interval all abort startup before the engine ever runs.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{FilterField, FilterRule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// M3U playlist source: an HTTP(S) URL or a local path
    pub playlist_url: String,
    /// XMLTV guide source: an HTTP(S) URL or a local path
    pub guide_url: String,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Externally reachable address used when rewriting playlist URLs
    pub server_address: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    #[serde(default)]
    pub relay: RelayConfig,
    /// Ordered inclusion rules; position is priority (lower wins)
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_relay_enabled(),
            ffmpeg_command: default_ffmpeg_command(),
            max_streams: default_max_streams(),
        }
    }
}

/// One configured filter rule before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub pattern: String,
    pub field: FilterField,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:6078".to_string()
}

fn default_refresh_interval() -> String {
    "12h".to_string()
}

fn default_relay_enabled() -> bool {
    true
}

fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

fn default_max_streams() -> usize {
    1
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&contents).context("parsing config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.playlist_url.is_empty() {
            bail!("playlist_url is required");
        }
        if self.guide_url.is_empty() {
            bail!("guide_url is required");
        }
        if self.server_address.is_empty() {
            bail!("server_address is required");
        }

        // Rewritten URLs always carry their own scheme.
        self.server_address = self
            .server_address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        validate_source(&self.playlist_url).context("invalid playlist_url")?;
        validate_source(&self.guide_url).context("invalid guide_url")?;

        self.refresh_interval()?;
        self.compile_filters()?;

        Ok(())
    }

    /// Compile the ordered filter rules. Position in the returned list is
    /// the rule's priority.
    pub fn compile_filters(&self) -> Result<Vec<FilterRule>> {
        self.filters
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let pattern = Regex::new(&spec.pattern).with_context(|| {
                    format!("invalid regular expression in filter {index}: {}", spec.pattern)
                })?;
                Ok(FilterRule {
                    pattern,
                    field: spec.field,
                })
            })
            .collect()
    }

    pub fn refresh_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.refresh_interval)
            .with_context(|| format!("invalid refresh_interval {:?}", self.refresh_interval))
    }
}

fn validate_source(source: &str) -> Result<()> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(());
    }
    if Path::new(source).exists() {
        return Ok(());
    }
    bail!("{source} is neither an http(s) URL nor an existing file");
}
