//! Stream admission and relay engine.
//!
//! Each stream request walks Requested -> Admitted -> Launching -> Relaying
//! and terminates as Completed, Failed or Rejected. Admission is a weighted
//! semaphore acquired with a bounded wait; the relay copies ffmpeg stdout to
//! the HTTP response with independent read- and write-side timeout guards,
//! and the subprocess is torn down on every exit path.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::errors::RelayError;
use crate::models::{Channel, StreamSession};
use crate::proxy::Provider;

/// Bounded wait for an admission slot before a request is rejected.
const ADMISSION_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-read and per-write stall bound during the relay copy.
const IO_TIMEOUT: Duration = Duration::from_secs(30);
/// Read buffer for the subprocess stdout copy loop.
const RELAY_BUFFER_SIZE: usize = 8192;
/// In-flight chunks between the copy loop and the response body.
const RELAY_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy)]
struct RelayTimeouts {
    admission: Duration,
    read: Duration,
    write: Duration,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            admission: ADMISSION_TIMEOUT,
            read: IO_TIMEOUT,
            write: IO_TIMEOUT,
        }
    }
}

/// How one relay copy ended. A client hanging up is the expected shape of
/// stream teardown, not a failure.
#[derive(Debug)]
enum CopyOutcome {
    SourceEnded,
    ClientDisconnected,
    ReadTimeout,
    WriteTimeout,
    ReadFailed(std::io::Error),
}

/// Shared stream relay state: the admission gate, the live session
/// registry and the lifetime stream counter.
pub struct RelayManager {
    ffmpeg_command: String,
    max_streams: usize,
    gate: Arc<Semaphore>,
    sessions: Mutex<HashMap<Uuid, StreamSession>>,
    total_streams: AtomicU64,
    timeouts: RelayTimeouts,
}

impl RelayManager {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            ffmpeg_command: config.ffmpeg_command.clone(),
            max_streams: config.max_streams,
            gate: Arc::new(Semaphore::new(config.max_streams)),
            sessions: Mutex::new(HashMap::new()),
            total_streams: AtomicU64::new(0),
            timeouts: RelayTimeouts::default(),
        }
    }

    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Streams relayed over the lifetime of the process.
    pub fn total_streams(&self) -> u64 {
        self.total_streams.load(Ordering::Relaxed)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Snapshot of the in-flight sessions for diagnostics.
    pub fn active_sessions(&self) -> Vec<StreamSession> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Probe the configured ffmpeg binary once at startup.
    pub async fn check_availability(&self) -> Result<Option<String>> {
        let output = Command::new(&self.ffmpeg_command)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!("executing {} -version", self.ffmpeg_command))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} -version exited with {}",
                self.ffmpeg_command,
                output.status
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().and_then(|line| {
            line.starts_with("ffmpeg version")
                .then(|| line.split_whitespace().nth(2).map(str::to_string))
                .flatten()
        });
        Ok(version)
    }

    /// Drive one stream request to a streaming response or a terminal
    /// per-request error.
    pub async fn stream(
        self: Arc<Self>,
        provider: &Provider,
        index: usize,
        client_addr: String,
    ) -> Result<Response, RelayError> {
        // Admitted-for-tracking before the concurrency gate.
        let session = SessionGuard::register(Arc::clone(&self), client_addr.clone(), index);

        let permit = match timeout(
            self.timeouts.admission,
            Arc::clone(&self.gate).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!(channel = index, client = %client_addr, "max streams reached");
                return Err(RelayError::MaxStreamsReached);
            }
        };

        // Resolve against the table snapshot current at admission time; a
        // concurrent refresh will not disturb this stream.
        let channel = provider
            .channel(index)
            .await
            .ok_or(RelayError::ChannelNotFound { index })?;
        let Some(url) = channel.url.clone() else {
            warn!(channel = index, "channel record has no source URL");
            return Err(RelayError::ChannelNotFound { index });
        };
        session.set_channel(&channel);

        info!(url = %url, channel = index, client = %client_addr, "remuxing stream");

        let mut command = Command::new(&self.ffmpeg_command);
        command
            .args(["-i", url.as_str(), "-c:v", "copy", "-f", "mpegts", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = ?command.as_std(), "starting remux subprocess");

        let mut child = command.spawn().map_err(|source| RelayError::SpawnFailed {
            command: self.ffmpeg_command.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(RelayError::MissingStdout)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr));
        }

        self.total_streams.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        let context = RelayContext {
            index,
            channel_name: channel.name.clone(),
            client_addr,
        };
        tokio::spawn(run_relay(
            child,
            stdout,
            tx,
            self.timeouts,
            permit,
            session,
            context,
        ));

        let body = Body::from_stream(ReceiverStream::new(rx));
        Ok((
            [
                (header::CONTENT_TYPE, "video/mpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response())
    }
}

struct RelayContext {
    index: usize,
    channel_name: String,
    client_addr: String,
}

/// RAII registration in the session registry. The registry lock is only
/// held for the duration of each mutation, never across I/O.
struct SessionGuard {
    manager: Arc<RelayManager>,
    id: Uuid,
}

impl SessionGuard {
    fn register(manager: Arc<RelayManager>, client_addr: String, channel_index: usize) -> Self {
        let id = Uuid::new_v4();
        let session = StreamSession {
            client_addr,
            channel_index,
            channel_name: None,
            logo_url: None,
            started_at: Utc::now(),
        };
        manager.sessions.lock().unwrap().insert(id, session);
        Self { manager, id }
    }

    fn set_channel(&self, channel: &Channel) {
        let mut sessions = self.manager.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&self.id) {
            session.channel_name = Some(channel.name.clone());
            session.logo_url = channel.tags.get("tvg-logo").cloned();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.sessions.lock().unwrap().remove(&self.id);
    }
}

/// Relay subprocess output to the response channel, then tear everything
/// down. The permit and session guard are dropped here on every path.
async fn run_relay(
    mut child: Child,
    stdout: ChildStdout,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    timeouts: RelayTimeouts,
    _permit: OwnedSemaphorePermit,
    _session: SessionGuard,
    context: RelayContext,
) {
    let started = Instant::now();
    let (bytes_relayed, outcome) = relay_copy(stdout, &tx, timeouts.read, timeouts.write).await;

    if let Err(error) = child.kill().await {
        debug!(%error, "remux subprocess kill");
    }

    match outcome {
        CopyOutcome::SourceEnded | CopyOutcome::ClientDisconnected => {
            info!(
                channel = context.index,
                name = %context.channel_name,
                client = %context.client_addr,
                bytes = bytes_relayed,
                elapsed = ?started.elapsed(),
                "stopped streaming"
            );
        }
        CopyOutcome::ReadTimeout | CopyOutcome::WriteTimeout => {
            warn!(
                channel = context.index,
                name = %context.channel_name,
                client = %context.client_addr,
                bytes = bytes_relayed,
                outcome = ?outcome,
                "timeout during stream relay"
            );
        }
        CopyOutcome::ReadFailed(ref error) => {
            error!(
                channel = context.index,
                name = %context.channel_name,
                client = %context.client_addr,
                bytes = bytes_relayed,
                %error,
                "error while relaying stream data"
            );
        }
    }
}

/// Copy `reader` to `tx`, racing each read and each send against its own
/// timer. A timer win is reported as a distinguished timeout outcome; a
/// closed channel means the client hung up and ends the copy normally.
async fn relay_copy<R>(
    mut reader: R,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> (u64, CopyOutcome)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match timeout(read_timeout, reader.read(&mut buf)).await {
            Err(_) => {
                // Let the client see the abort instead of a silent EOF.
                let _ = tx.try_send(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream read timed out",
                )));
                return (total, CopyOutcome::ReadTimeout);
            }
            Ok(Err(error)) => return (total, CopyOutcome::ReadFailed(error)),
            Ok(Ok(0)) => return (total, CopyOutcome::SourceEnded),
            Ok(Ok(n)) => n,
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        match timeout(write_timeout, tx.send(Ok(chunk))).await {
            Err(_) => return (total, CopyOutcome::WriteTimeout),
            Ok(Err(_)) => return (total, CopyOutcome::ClientDisconnected),
            Ok(Ok(())) => total += n as u64,
        }
    }
}

/// Log subprocess stderr line by line. ffmpeg terminates progress lines
/// with a bare carriage return, so both `\n` and `\r` end a line.
async fn pump_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    loop {
        match read_log_line(&mut reader).await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    debug!(target: "ffmpeg", "{line}");
                }
            }
            Ok(None) => break,
            Err(error) => {
                debug!(%error, "error reading remux subprocess stderr");
                break;
            }
        }
    }
}

/// Read one line terminated by `\n` or bare `\r`; `None` at end of input.
async fn read_log_line<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let (consumed, terminated, at_eof) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                (0, false, true)
            } else if let Some(pos) = available.iter().position(|&b| b == b'\n' || b == b'\r') {
                line.extend_from_slice(&available[..pos]);
                (pos + 1, true, false)
            } else {
                line.extend_from_slice(available);
                (available.len(), false, false)
            }
        };
        reader.consume(consumed);
        if terminated {
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        if at_eof {
            if line.is_empty() {
                return Ok(None);
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RelayConfig};
    use crate::models::{FilterField, FilterRule};
    use regex::Regex;
    use std::io::Cursor;
    use tokio::io::AsyncWriteExt;

    fn test_manager(max_streams: usize) -> Arc<RelayManager> {
        Arc::new(RelayManager {
            ffmpeg_command: "ffmpeg".to_string(),
            max_streams,
            gate: Arc::new(Semaphore::new(max_streams)),
            sessions: Mutex::new(HashMap::new()),
            total_streams: AtomicU64::new(0),
            timeouts: RelayTimeouts {
                admission: Duration::from_millis(50),
                read: Duration::from_millis(100),
                write: Duration::from_millis(100),
            },
        })
    }

    fn empty_provider() -> Provider {
        let config = Config {
            log_level: "info".to_string(),
            playlist_url: "playlist.m3u".to_string(),
            guide_url: "guide.xml".to_string(),
            listen_address: "127.0.0.1:0".to_string(),
            server_address: "test.example:6078".to_string(),
            refresh_interval: "12h".to_string(),
            relay: RelayConfig::default(),
            filters: Vec::new(),
        };
        let rules = vec![FilterRule {
            pattern: Regex::new(".*").unwrap(),
            field: FilterField::Id,
        }];
        Provider::new(&config, rules)
    }

    #[tokio::test]
    async fn unresolvable_index_releases_the_admission_slot() {
        let manager = test_manager(1);
        let provider = empty_provider();

        let err = Arc::clone(&manager)
            .stream(&provider, 0, "test-client".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ChannelNotFound { index: 0 }));

        // Slot and session were both released on the error path.
        assert_eq!(manager.gate.available_permits(), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn saturated_gate_rejects_within_the_wait_bound() {
        let manager = test_manager(1);
        let provider = empty_provider();

        let _held = Arc::clone(&manager.gate).acquire_owned().await.unwrap();

        let started = Instant::now();
        let err = Arc::clone(&manager)
            .stream(&provider, 0, "test-client".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MaxStreamsReached));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn gate_never_exceeds_capacity() {
        let manager = test_manager(2);

        let attempts = (0..4).map(|_| {
            let gate = Arc::clone(&manager.gate);
            async move {
                timeout(Duration::from_millis(50), gate.acquire_owned())
                    .await
                    .ok()
            }
        });
        let granted: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .filter_map(|acquired| acquired.ok())
            .collect();

        assert_eq!(granted.len(), 2);
        assert_eq!(manager.gate.available_permits(), 0);

        drop(granted);
        assert_eq!(manager.gate.available_permits(), 2);
    }

    #[tokio::test]
    async fn relay_copy_forwards_until_source_ends() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);

        let copy = tokio::spawn(async move {
            relay_copy(
                reader,
                &tx,
                Duration::from_millis(500),
                Duration::from_millis(500),
            )
            .await
        });

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        drop(writer);

        let (bytes, outcome) = copy.await.unwrap();
        assert_eq!(bytes, 11);
        assert!(matches!(outcome, CopyOutcome::SourceEnded));

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn relay_copy_times_out_on_silent_source() {
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);

        let (bytes, outcome) = relay_copy(
            reader,
            &tx,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(bytes, 0);
        assert!(matches!(outcome, CopyOutcome::ReadTimeout));
        // The client is told about the abort.
        let aborted = rx.recv().await.unwrap();
        assert!(aborted.is_err());
    }

    #[tokio::test]
    async fn relay_copy_times_out_on_stalled_client() {
        // The duplex pipe hands out at most 64 bytes per read, so 200 bytes
        // guarantees several sends into a full, unread channel.
        let (writer, reader) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(1);

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            let _ = writer.write_all(&[0u8; 200]).await;
            // Hold the writer open so the source cannot reach EOF.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (_, outcome) = relay_copy(
            reader,
            &tx,
            Duration::from_millis(500),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(outcome, CopyOutcome::WriteTimeout));
        writer_task.abort();
    }

    #[tokio::test]
    async fn client_disconnect_ends_the_copy_normally() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let copy = tokio::spawn(async move {
            relay_copy(
                reader,
                &tx,
                Duration::from_millis(500),
                Duration::from_millis(500),
            )
            .await
        });

        writer.write_all(b"data").await.unwrap();
        let (_, outcome) = copy.await.unwrap();
        assert!(matches!(outcome, CopyOutcome::ClientDisconnected));
    }

    #[tokio::test]
    async fn log_lines_split_on_newline_and_carriage_return() {
        let mut reader = BufReader::new(Cursor::new(b"first\rsecond\nthird".to_vec()));

        assert_eq!(
            read_log_line(&mut reader).await.unwrap().as_deref(),
            Some("first")
        );
        assert_eq!(
            read_log_line(&mut reader).await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(
            read_log_line(&mut reader).await.unwrap().as_deref(),
            Some("third")
        );
        assert_eq!(read_log_line(&mut reader).await.unwrap(), None);
    }

    #[test]
    fn sessions_are_registered_and_removed_by_the_guard() {
        let manager = test_manager(1);

        let guard = SessionGuard::register(Arc::clone(&manager), "client".to_string(), 3);
        assert_eq!(manager.active_count(), 1);
        let sessions = manager.active_sessions();
        assert_eq!(sessions[0].channel_index, 3);
        assert_eq!(sessions[0].client_addr, "client");
        assert!(sessions[0].channel_name.is_none());

        drop(guard);
        assert_eq!(manager.active_count(), 0);
    }
}
