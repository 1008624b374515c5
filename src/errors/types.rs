//! Error type definitions for the IPTV relay application
//!
//! Each hard subsystem gets its own error enum so callers can distinguish
//! malformed upstream input from per-request relay failures.

use thiserror::Error;

/// Errors produced while decoding an M3U playlist document.
///
/// All variants abort the decode; a refresh that hits one leaves the
/// previously published lineup untouched.
#[derive(Error, Debug)]
pub enum PlaylistError {
    /// The document did not start with the required `#EXTM3U` header
    #[error("malformed M3U: missing #EXTM3U header")]
    MissingHeader,

    /// A stream URL appeared before any `#EXTINF` metadata line
    #[error("URL on line {line} without preceding #EXTINF")]
    UrlBeforeExtinf { line: usize },

    /// The duration field of an `#EXTINF` line could not be parsed
    #[error("invalid duration {value:?} on line {line}: {source}")]
    InvalidDuration {
        line: usize,
        value: String,
        source: std::num::ParseFloatError,
    },

    /// Underlying reader failure
    #[error("I/O error reading playlist: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while filtering an XMLTV guide document.
///
/// A decode error on any element is fatal for the whole filter call; there
/// is no partial result.
#[derive(Error, Debug)]
pub enum GuideError {
    #[error("malformed XMLTV document: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XMLTV attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("invalid UTF-8 in XMLTV element: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The document ended inside an element that was still open
    #[error("unexpected end of document inside <{element}>")]
    UnexpectedEof { element: String },
}

/// Per-request failures of the stream admission and relay engine.
///
/// None of these are fatal to the process; the web layer maps them to HTTP
/// status codes.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The admission gate could not be acquired within the wait bound
    #[error("too many concurrent streams")]
    MaxStreamsReached,

    /// The channel index does not resolve to a streamable channel
    #[error("channel {index} not found")]
    ChannelNotFound { index: usize },

    /// The remux subprocess could not be started
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    /// The remux subprocess was started without a stdout pipe
    #[error("remux subprocess has no stdout pipe")]
    MissingStdout,
}
