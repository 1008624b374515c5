//! IPTV playlist and EPG aggregation proxy.
//!
//! The crate ingests a remote M3U playlist and an XMLTV guide, applies
//! ordered inclusion rules to select and deduplicate channels, republishes
//! the filtered playlist and guide over HTTP, and relays each selected
//! channel's live stream through an ffmpeg remux subprocess, with the number
//! of concurrent subprocesses capped by a semaphore.

pub mod config;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod services;
pub mod sources;
pub mod web;
