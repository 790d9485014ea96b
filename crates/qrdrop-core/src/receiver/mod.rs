//! Receiver engine.
//!
//! The engine is the single entry point for payload text coming off a QR
//! scanner. Each call to [`ReceiverEngine::process_frame`] parses one
//! payload, routes it to its session, and when the session has every chunk
//! runs the reconstruction pipeline and saves the file.
//!
//! ## Features
//!
//! - Frames for different transfers are processed concurrently
//! - Reconstruction runs on the blocking pool, off the async workers
//! - Every frame gets a [`FrameResponse`], including rejected ones
//! - A background task evicts old sessions and expires idle ones
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qrdrop_core::config::Config;
//! use qrdrop_core::receiver::ReceiverEngine;
//!
//! let engine = Arc::new(ReceiverEngine::new(&Config::load()?));
//! for line in payloads {
//!     let response = engine.process_frame(&line).await;
//!     if let Some(file) = response.file {
//!         println!("received {} ({} bytes)", file.name, file.size);
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SessionConfig};
use crate::crypto::KeyMaterial;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::{FrameParser, ParserStats};
use crate::output::{DirectorySink, OutputSink, SavedFile};
use crate::pipeline::{Pipeline, PipelineOptions, ProgressSink, Reconstructed};
use crate::session::{
    ApplyOutcome, Origin, SessionId, SessionLimits, SessionRegistry, SessionSnapshot,
};

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    /// Chunk stored; the session is still receiving
    Accepted,
    /// Chunk already present, or the session is finished
    Duplicate,
    /// Frame dropped before reaching a session, or refused by a limit
    Rejected,
    /// Chunk failed its checksum
    IntegrityFailed,
    /// Last chunk stored and the file reconstructed
    Completed,
    /// Last chunk stored but reconstruction failed
    Failed,
}

/// Error details carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Coarse classification
    pub kind: ErrorKind,
    /// Stable error code, e.g. `Q001`
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Hint for fixing the problem
    pub detail: Option<String>,
    /// Whether rescanning can fix it
    pub recoverable: bool,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let detail = match err {
            Error::Parse(parse) => Some(parse.kind_name().to_string()),
            _ => err.suggestion().map(str::to_string),
        };
        Self {
            kind: err.kind(),
            code: err.code().map(str::to_string),
            message: err.to_string(),
            detail,
            recoverable: err.is_recoverable(),
        }
    }
}

/// A file produced by a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructedFile {
    /// Name the file was saved under, or its transmitted name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the contents
    pub sha256: String,
    /// Whether a declared checksum was checked
    pub verified: bool,
    /// Bytes repaired by error correction
    pub corrected_symbols: usize,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Where the output sink put it
    pub saved_to: Option<String>,
    /// File contents
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Response to one processed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResponse {
    /// Whether the frame moved its transfer forward
    pub success: bool,
    /// Short summary
    pub message: String,
    /// Error details, if any
    pub error: Option<ErrorBody>,
    /// What happened to the frame
    pub outcome: FrameStatus,
    /// The session the frame was routed to
    pub session: Option<SessionSnapshot>,
    /// The reconstructed file, on completion
    pub file: Option<ReconstructedFile>,
}

impl FrameResponse {
    fn ok(outcome: FrameStatus, message: impl Into<String>, session: SessionSnapshot) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            outcome,
            session: Some(session),
            file: None,
        }
    }

    fn error(outcome: FrameStatus, err: &Error, session: Option<SessionSnapshot>) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            error: Some(ErrorBody::from(err)),
            outcome,
            session,
            file: None,
        }
    }

    /// Id of the session the frame was routed to.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Sessions created
    pub sessions_created: u64,
    /// Sessions that reconstructed their file
    pub sessions_completed: u64,
    /// Sessions that failed or timed out
    pub sessions_failed: u64,
    /// Payloads handed to the engine
    pub frames_processed: u64,
    /// Payloads that did not reach a session or were refused
    pub frames_rejected: u64,
    /// Chunks stored
    pub chunks_accepted: u64,
    /// Chunk bytes stored
    pub bytes_received: u64,
    /// Duplicate frames
    pub duplicates: u64,
    /// Chunks that failed their checksum
    pub integrity_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_created: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    frames_processed: AtomicU64,
    frames_rejected: AtomicU64,
    chunks_accepted: AtomicU64,
    bytes_received: AtomicU64,
    duplicates: AtomicU64,
    integrity_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
        }
    }
}

/// Everything the engine knows, for status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOverview {
    /// Sessions still receiving
    pub active: Vec<SessionSnapshot>,
    /// Terminal sessions not yet evicted
    pub finished: Vec<SessionSnapshot>,
    /// Engine counters
    pub stats: EngineStats,
    /// Parser counters
    pub parser: ParserStats,
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Terminal sessions deleted
    pub evicted: usize,
    /// Idle sessions failed
    pub expired: Vec<SessionId>,
}

/// Orchestrates parsing, session routing and reconstruction.
pub struct ReceiverEngine {
    parser: FrameParser,
    registry: SessionRegistry,
    limits: SessionLimits,
    max_chunk_bytes: u64,
    sessions: SessionConfig,
    pipeline: Pipeline,
    output: Option<Arc<dyn OutputSink>>,
    counters: Counters,
}

impl std::fmt::Debug for ReceiverEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverEngine")
            .field("limits", &self.limits)
            .field("active", &self.registry.active_len())
            .field("finished", &self.registry.finished_len())
            .finish_non_exhaustive()
    }
}

impl ReceiverEngine {
    /// Create an engine from configuration.
    ///
    /// Files go to a [`DirectorySink`] on the download directory. In
    /// memory-only mode nothing is saved; the bytes reach the caller only
    /// through [`FrameResponse::file`]. No key
    /// material is loaded; see [`ReceiverEngine::with_key`].
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let output: Option<Arc<dyn OutputSink>> = if config.output.memory_only {
            None
        } else {
            Some(Arc::new(DirectorySink::new(
                config.output.resolved_directory(),
            )))
        };

        Self {
            parser: FrameParser::new(&config.reception.supported_formats),
            registry: SessionRegistry::new(),
            limits: SessionLimits::from(&config.reception),
            max_chunk_bytes: config.reception.max_chunk_bytes,
            sessions: config.sessions.clone(),
            pipeline: Pipeline::new(PipelineOptions::from(&config.pipeline)),
            output,
            counters: Counters::default(),
        }
    }

    /// Use `output` for completed files.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = Some(output);
        self
    }

    /// Use `key` to decrypt encrypted transfers.
    #[must_use]
    pub fn with_key(mut self, key: Option<KeyMaterial>) -> Self {
        self.pipeline = self.pipeline.with_key(key);
        self
    }

    /// Report pipeline progress to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.pipeline = self.pipeline.with_sink(sink);
        self
    }

    /// Process one payload string.
    pub async fn process_frame(&self, payload: &str) -> FrameResponse {
        Counters::bump(&self.counters.frames_processed);

        let frame = match self.parser.parse(payload) {
            Ok(frame) => frame,
            Err(e) => {
                Counters::bump(&self.counters.frames_rejected);
                tracing::debug!(error = %e, "Dropped payload");
                return FrameResponse::error(FrameStatus::Rejected, &Error::Parse(e), None);
            }
        };

        let resolved = match self.registry.resolve(&frame, &self.limits) {
            Ok(resolved) => resolved,
            Err(e) => {
                Counters::bump(&self.counters.frames_rejected);
                tracing::warn!(total = frame.total, error = %e, "Refused new session");
                return FrameResponse::error(FrameStatus::Rejected, &e, None);
            }
        };
        if resolved.origin == Origin::Created {
            Counters::bump(&self.counters.sessions_created);
        }

        let index = frame.index;
        let size = frame.data.len() as u64;
        let mut session = resolved.session.clone().lock_owned().await;

        match session.apply(frame, self.max_chunk_bytes) {
            ApplyOutcome::Accepted => {
                Counters::bump(&self.counters.chunks_accepted);
                self.counters.bytes_received.fetch_add(size, Ordering::Relaxed);
                tracing::debug!(
                    session_id = %resolved.id,
                    index,
                    total = session.total_chunks(),
                    received = session.received_chunks(),
                    "Chunk accepted"
                );
            }
            ApplyOutcome::DuplicateIgnored => {
                Counters::bump(&self.counters.duplicates);
                return FrameResponse::ok(
                    FrameStatus::Duplicate,
                    format!("chunk {index} already received"),
                    session.snapshot(),
                );
            }
            ApplyOutcome::IntegrityFailed => {
                Counters::bump(&self.counters.integrity_failures);
                let err = Error::ChecksumMismatch {
                    file: session.display_name(),
                    chunk: index,
                };
                return FrameResponse::error(
                    FrameStatus::IntegrityFailed,
                    &err,
                    Some(session.snapshot()),
                );
            }
            ApplyOutcome::Rejected(err) => {
                Counters::bump(&self.counters.frames_rejected);
                tracing::warn!(session_id = %resolved.id, index, error = %err, "Chunk rejected");
                return FrameResponse::error(FrameStatus::Rejected, &err, Some(session.snapshot()));
            }
        }

        if !session.is_complete() {
            let received = session.received_chunks();
            let total = session.total_chunks();
            return FrameResponse::ok(
                FrameStatus::Accepted,
                format!("chunk {index} stored ({received}/{total})"),
                session.snapshot(),
            );
        }

        tracing::info!(session_id = %resolved.id, "All chunks received, reconstructing");
        let pipeline = self.pipeline.clone();
        let output = self.output.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = pipeline.run(&mut session);
            let saved = result
                .as_ref()
                .ok()
                .zip(output.as_ref())
                .map(|(file, sink)| sink.save(&session.display_name(), &file.data));
            if let Some(Ok(saved)) = &saved {
                session.set_saved_to(saved.location.clone());
            }
            (session, result, saved)
        })
        .await;

        let (session, result, saved) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                let mut session = resolved.session.lock().await;
                let err = Error::Internal(format!("reconstruction task failed: {e}"));
                session.fail(err.to_string(), Vec::new());
                self.registry.complete(&resolved.id);
                Counters::bump(&self.counters.sessions_failed);
                return FrameResponse::error(FrameStatus::Failed, &err, Some(session.snapshot()));
            }
        };

        self.registry.complete(&resolved.id);
        let snapshot = session.snapshot();
        let name = session.display_name();
        drop(session);

        match result {
            Ok(file) => {
                Counters::bump(&self.counters.sessions_completed);
                Self::completed(name, file, saved, snapshot)
            }
            Err(err) => {
                Counters::bump(&self.counters.sessions_failed);
                FrameResponse::error(FrameStatus::Failed, &err, Some(snapshot))
            }
        }
    }

    fn completed(
        name: String,
        file: Reconstructed,
        saved: Option<Result<SavedFile>>,
        snapshot: SessionSnapshot,
    ) -> FrameResponse {
        let (saved_to, saved_name, save_error) = match saved {
            Some(Ok(saved)) => (Some(saved.location), saved.name, None),
            Some(Err(e)) => {
                tracing::error!(file = %name, error = %e, "Failed to save file");
                (None, name, Some(e))
            }
            None => (None, name, None),
        };

        let message = match &saved_to {
            Some(location) => format!("received {saved_name}, saved to {location}"),
            None => format!("received {saved_name}"),
        };
        FrameResponse {
            success: true,
            message,
            error: save_error.as_ref().map(ErrorBody::from),
            outcome: FrameStatus::Completed,
            session: Some(snapshot),
            file: Some(ReconstructedFile {
                name: saved_name,
                size: file.data.len() as u64,
                sha256: file.sha256_hex,
                verified: file.verified,
                corrected_symbols: file.corrected_symbols,
                warnings: file.warnings,
                saved_to,
                data: file.data,
            }),
        }
    }

    /// Snapshot of one session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session does not exist.
    pub async fn session_status(&self, id: &SessionId) -> Result<SessionSnapshot> {
        self.registry
            .snapshot(id)
            .await
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Snapshot of every session and all counters.
    pub async fn all_sessions(&self) -> EngineOverview {
        let (active, finished) = self.registry.snapshot_all().await;
        EngineOverview {
            active,
            finished,
            stats: self.stats(),
            parser: self.parser.stats(),
        }
    }

    /// Engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Parser counters.
    #[must_use]
    pub fn parser_stats(&self) -> ParserStats {
        self.parser.stats()
    }

    /// Delete terminal sessions older than `max_age`.
    pub async fn evict_finished(&self, max_age: Duration) -> usize {
        let evicted = self.registry.evict_finished(max_age).await;
        if evicted > 0 {
            tracing::info!(evicted, "Evicted finished sessions");
        }
        evicted
    }

    /// Fail active sessions idle for at least `max_idle`.
    pub fn expire_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let expired = self.registry.expire_idle(max_idle);
        self.counters
            .sessions_failed
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    /// Expire idle sessions, then evict old terminal ones, using the
    /// configured ages.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let expired = self.expire_idle(self.sessions.idle_timeout);
        let evicted = self.evict_finished(self.sessions.finished_retention).await;
        MaintenanceReport { evicted, expired }
    }

    /// Run maintenance every `interval` until `token` is cancelled.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        tracing::debug!("Maintenance task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = engine.run_maintenance().await;
                        tracing::trace!(
                            evicted = report.evicted,
                            expired = report.expired.len(),
                            "Maintenance pass"
                        );
                    }
                }
            }
        })
    }

    /// Number of sessions still receiving.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.registry.active_len()
    }

    /// Number of terminal sessions retained.
    #[must_use]
    pub fn finished_sessions(&self) -> usize {
        self.registry.finished_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn engine() -> ReceiverEngine {
        ReceiverEngine::new(&Config::default())
    }

    #[tokio::test]
    async fn test_three_simple_frames() {
        let engine = engine();
        let a = engine.process_frame("F:0:3:QQ==").await;
        assert_eq!(a.outcome, FrameStatus::Accepted);
        assert!(a.success);

        engine.process_frame("F:2:3:Qw==").await;
        let done = engine.process_frame("F:1:3:Qg==").await;
        assert_eq!(done.outcome, FrameStatus::Completed);
        let file = done.file.unwrap();
        assert_eq!(file.data, b"ABC");
        assert!(file.saved_to.is_none());
        assert_eq!(done.session.unwrap().state, SessionState::Completed);

        let stats = engine.stats();
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.chunks_accepted, 3);
        assert_eq!(stats.bytes_received, 3);
    }

    #[tokio::test]
    async fn test_memory_only_keeps_nothing() {
        let engine = engine();
        assert!(engine.output.is_none());

        for name in ["a.txt", "b.txt", "c.txt"] {
            let payload = format!(
                r#"{{"fmt":"qrfile/v2","index":0,"total":1,"data_b64":"QUJD","name":"{name}"}}"#
            );
            let done = engine.process_frame(&payload).await;
            assert_eq!(done.outcome, FrameStatus::Completed);
            let file = done.file.unwrap();
            assert_eq!(file.data, b"ABC");
            assert!(file.saved_to.is_none());
            assert!(done.session.unwrap().outcome.unwrap().saved_to.is_none());
        }

        assert_eq!(engine.evict_finished(Duration::ZERO).await, 3);
        assert_eq!(engine.finished_sessions(), 0);
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let engine = engine();
        let response = engine.process_frame("not a frame").await;

        assert!(!response.success);
        assert_eq!(response.outcome, FrameStatus::Rejected);
        assert!(response.session.is_none());
        let body = response.error.unwrap();
        assert_eq!(body.kind, ErrorKind::Parse);
        assert_eq!(body.code.as_deref(), Some("Q001"));
        assert_eq!(body.detail.as_deref(), Some("unknown_format"));
        assert!(body.recoverable);
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(engine.parser_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_after_completion() {
        let engine = engine();
        engine.process_frame("F:0:1:QQ==").await;
        let again = engine.process_frame("F:0:1:QQ==").await;

        assert_eq!(again.outcome, FrameStatus::Duplicate);
        assert!(again.file.is_none());
        assert_eq!(again.session.unwrap().state, SessionState::Completed);
        assert_eq!(engine.stats().sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_chunk_too_large_rejected() {
        let mut config = Config::default();
        config.reception.max_chunk_bytes = 2;
        let engine = ReceiverEngine::new(&config);

        let response = engine.process_frame("F:0:2:QUJD").await;
        assert_eq!(response.outcome, FrameStatus::Rejected);
        assert_eq!(response.error.unwrap().kind, ErrorKind::Capacity);
        assert_eq!(response.session.unwrap().received_chunks, 0);
    }

    #[tokio::test]
    async fn test_session_status_lookup() {
        let engine = engine();
        let response = engine.process_frame("F:0:2:QQ==").await;
        let id = response.session_id().unwrap().clone();

        let snapshot = engine.session_status(&id).await.unwrap();
        assert_eq!(snapshot.missing_chunks, vec![1]);
        assert!(matches!(
            engine.session_status(&SessionId::from_string("nope")).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_maintenance_with_configured_ages() {
        let mut config = Config::default();
        config.sessions.idle_timeout = Duration::ZERO;
        config.sessions.finished_retention = Duration::from_secs(3600);
        let engine = ReceiverEngine::new(&config);

        engine.process_frame("F:0:2:QQ==").await;
        let report = engine.run_maintenance().await;
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(engine.finished_sessions(), 1);
        assert_eq!(engine.stats().sessions_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_task_stops_on_cancel() {
        let mut config = Config::default();
        config.sessions.finished_retention = Duration::ZERO;
        let engine = Arc::new(ReceiverEngine::new(&config));
        engine.process_frame("F:0:1:QQ==").await;
        assert_eq!(engine.finished_sessions(), 1);

        let token = CancellationToken::new();
        let handle = engine.spawn_maintenance(Duration::from_secs(60), token.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(engine.finished_sessions(), 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_overview_serializes() {
        let engine = engine();
        engine.process_frame("F:0:2:QQ==").await;
        let overview = engine.all_sessions().await;
        assert_eq!(overview.active.len(), 1);

        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["stats"]["frames_processed"], 1);
        assert_eq!(json["parser"]["succeeded"], 1);
    }
}
