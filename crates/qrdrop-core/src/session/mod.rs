//! Reception sessions.
//!
//! A session collects the chunks of one transfer. Frames are matched to a
//! session by a [`SessionId`] derived from the filename, chunk count and
//! declared size, so a sender looping over its QR codes repeatedly feeds the
//! same session.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ─► Receiving ─► Assembling ─► CorrectingErrors ─► Decrypting ─► Decompressing ─► Verifying ─► Completed
//!  │          │
//!  └──────────┴──────────── any stage failure or idle timeout ───────────────────────────────► Failed
//! ```
//!
//! Terminal sessions never change again; late frames are ignored as
//! duplicates until the session is evicted.

pub mod registry;

pub use registry::{Origin, Resolved, SessionLimits, SessionRegistry, SharedSession};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::Error;
use crate::fec::FecParams;
use crate::frame::{FileMetadata, Frame, WireFormat};

/// Identity shared by every frame of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Derive the identity of the transfer a frame belongs to.
    ///
    /// First 16 hex characters of SHA-256 over
    /// `"{name or unknown}_{total}_{size or 0}"`. Two different files with the
    /// same name, chunk count and size share an identity.
    #[must_use]
    pub fn derive(frame: &Frame) -> Self {
        let name = frame.meta.name.as_deref().unwrap_or("unknown");
        let size = frame.meta.size.unwrap_or(0);
        let digest = crypto::sha256_hex(format!("{name}_{}_{size}", frame.total).as_bytes());
        Self(digest[..crate::SESSION_ID_LEN].to_string())
    }

    /// Wrap an existing identifier, e.g. one typed by a user.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no chunk stored yet
    Idle,
    /// Collecting chunks
    Receiving,
    /// Concatenating chunks
    Assembling,
    /// Running Reed-Solomon correction
    CorrectingErrors,
    /// Decrypting the payload
    Decrypting,
    /// Decompressing the payload
    Decompressing,
    /// Checking the file checksum
    Verifying,
    /// File reconstructed
    Completed,
    /// Reconstruction failed or the session timed out
    Failed,
}

impl SessionState {
    /// Whether the session is finished for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One stored chunk.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Decoded chunk bytes
    pub data: Vec<u8>,
    /// Checksum the chunk arrived with
    pub checksum: Option<String>,
    /// When the chunk was accepted
    pub received_at: DateTime<Utc>,
}

/// What applying a frame did to a session.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Chunk stored
    Accepted,
    /// Chunk already present, or the session is finished
    DuplicateIgnored,
    /// Chunk failed its checksum and was not stored
    IntegrityFailed,
    /// Chunk refused by a limit
    Rejected(Error),
}

/// Summary recorded when a session becomes terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Size of the reconstructed file
    pub final_size: u64,
    /// SHA-256 of the reconstructed file
    pub sha256: Option<String>,
    /// Whether a declared file checksum was checked
    pub verified: bool,
    /// Bytes repaired by error correction
    pub corrected_symbols: usize,
    /// Non-fatal problems met along the way
    pub warnings: Vec<String>,
    /// Why the session failed
    pub failure: Option<String>,
    /// Where the file was saved
    pub saved_to: Option<String>,
}

/// Mutable reconstruction state for one transfer.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    format: WireFormat,
    total_chunks: usize,
    meta: FileMetadata,
    chunks: BTreeMap<usize, ChunkRecord>,
    state: SessionState,
    bytes_received: u64,
    integrity_failures: u64,
    duplicates: u64,
    failed_chunks: BTreeSet<usize>,
    error_count: u64,
    started_at: DateTime<Utc>,
    started: Instant,
    last_activity_at: DateTime<Utc>,
    last_activity: Instant,
    finished: Option<Instant>,
    percentage: f64,
    eta: Option<Duration>,
    outcome: Option<SessionOutcome>,
}

impl Session {
    /// Create a session from the first frame of a transfer.
    ///
    /// The session adopts that frame's metadata. The frame itself is not
    /// stored; call [`Session::apply`] for that.
    #[must_use]
    pub fn new(id: SessionId, frame: &Frame) -> Self {
        let now = Utc::now();
        Self {
            id,
            format: frame.format,
            total_chunks: frame.total,
            meta: frame.meta.clone(),
            chunks: BTreeMap::new(),
            state: SessionState::Idle,
            bytes_received: 0,
            integrity_failures: 0,
            duplicates: 0,
            failed_chunks: BTreeSet::new(),
            error_count: 0,
            started_at: now,
            started: Instant::now(),
            last_activity_at: now,
            last_activity: Instant::now(),
            finished: None,
            percentage: 0.0,
            eta: None,
            outcome: None,
        }
    }

    /// Store a frame's chunk if it is new and intact.
    pub fn apply(&mut self, frame: Frame, max_chunk_bytes: u64) -> ApplyOutcome {
        if self.state.is_terminal() {
            return ApplyOutcome::DuplicateIgnored;
        }
        self.touch();

        if self.chunks.contains_key(&frame.index) {
            self.duplicates += 1;
            return ApplyOutcome::DuplicateIgnored;
        }

        if frame.data.len() as u64 > max_chunk_bytes {
            self.error_count += 1;
            return ApplyOutcome::Rejected(Error::Capacity {
                limit: "chunk bytes",
                requested: frame.data.len() as u64,
                max: max_chunk_bytes,
            });
        }

        if let Some(expected) = &frame.chunk_checksum {
            let actual = crypto::sha256_hex(&frame.data);
            if !crypto::checksum_matches(expected, &actual) {
                self.integrity_failures += 1;
                self.error_count += 1;
                self.failed_chunks.insert(frame.index);
                tracing::warn!(
                    session_id = %self.id,
                    index = frame.index,
                    expected = %expected,
                    actual = %crypto::matching_prefix(expected, &actual),
                    "Chunk checksum mismatch"
                );
                return ApplyOutcome::IntegrityFailed;
            }
        }

        self.bytes_received += frame.data.len() as u64;
        self.failed_chunks.remove(&frame.index);
        self.chunks.insert(
            frame.index,
            ChunkRecord {
                data: frame.data,
                checksum: frame.chunk_checksum,
                received_at: self.last_activity_at,
            },
        );
        if self.state == SessionState::Idle {
            self.set_state(SessionState::Receiving);
        }
        self.update_progress();
        ApplyOutcome::Accepted
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_progress(&mut self) {
        let received = self.chunks.len();
        self.percentage = received as f64 / self.total_chunks as f64 * 100.0;

        let elapsed = self.started.elapsed().as_secs_f64();
        let remaining = self.total_chunks - received;
        self.eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if elapsed > 0.0 {
            let rate = received as f64 / elapsed;
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    /// Whether every chunk index is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks
    }

    /// Missing chunk indices in ascending order.
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    /// Concatenate stored chunks in index order.
    #[must_use]
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.assembled_len());
        for record in self.chunks.values() {
            out.extend_from_slice(&record.data);
        }
        out
    }

    /// Sum of stored chunk lengths.
    #[must_use]
    pub fn assembled_len(&self) -> usize {
        self.chunks.values().map(|r| r.data.len()).sum()
    }

    /// Move to a non-terminal stage.
    pub fn set_state(&mut self, state: SessionState) {
        if !self.state.is_terminal() {
            tracing::trace!(session_id = %self.id, ?state, "Session state");
            self.state = state;
        }
    }

    /// Finish successfully with an outcome.
    pub fn complete(&mut self, outcome: SessionOutcome) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Completed;
        self.percentage = 100.0;
        self.eta = Some(Duration::ZERO);
        self.outcome = Some(outcome);
        self.finished = Some(Instant::now());
    }

    /// Finish with a failure.
    ///
    /// Warnings gathered before the failure are kept.
    pub fn fail(&mut self, reason: impl Into<String>, warnings: Vec<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Failed;
        self.error_count += 1;
        self.eta = None;
        self.outcome = Some(SessionOutcome {
            warnings,
            failure: Some(reason.into()),
            ..SessionOutcome::default()
        });
        self.finished = Some(Instant::now());
    }

    /// Record where the file ended up.
    pub fn set_saved_to(&mut self, location: impl Into<String>) {
        if let Some(outcome) = &mut self.outcome {
            outcome.saved_to = Some(location.into());
        }
    }

    /// Session identity.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is finished for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Metadata adopted from the first frame.
    #[must_use]
    pub const fn meta(&self) -> &FileMetadata {
        &self.meta
    }

    /// Declared FEC layout.
    #[must_use]
    pub const fn fec(&self) -> Option<FecParams> {
        self.meta.fec
    }

    /// Declared chunk count.
    #[must_use]
    pub const fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn received_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Filename to save under.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.meta
            .name
            .clone()
            .unwrap_or_else(|| format!("qr_transfer_{}.bin", self.id))
    }

    /// Outcome, once terminal.
    #[must_use]
    pub const fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// Time since the last frame touched this session.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Time since the session became terminal.
    #[must_use]
    pub fn finished_for(&self) -> Option<Duration> {
        self.finished.map(|at| at.elapsed())
    }

    /// Serializable view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            filename: self.meta.name.clone(),
            format: self.format,
            state: self.state,
            total_chunks: self.total_chunks,
            received_chunks: self.chunks.len(),
            missing_chunks: self.missing_chunks(),
            percentage: self.percentage,
            eta_seconds: self.eta.map(|d| d.as_secs()),
            bytes_received: self.bytes_received,
            expected_size: self.meta.size,
            duplicates: self.duplicates,
            integrity_failures: self.integrity_failures,
            failed_chunks: self.failed_chunks.iter().copied().collect(),
            error_count: self.error_count,
            compression: self.meta.compression.clone(),
            encrypted: self.meta.encrypted,
            fec: self.meta.fec,
            started_at: self.started_at,
            last_activity: self.last_activity_at,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identity
    pub id: SessionId,
    /// Original filename, if known
    pub filename: Option<String>,
    /// Wire format of the first frame
    pub format: WireFormat,
    /// Current state
    pub state: SessionState,
    /// Declared chunk count
    pub total_chunks: usize,
    /// Stored chunks
    pub received_chunks: usize,
    /// Missing chunk indices
    pub missing_chunks: Vec<usize>,
    /// Progress (0.0 - 100.0)
    pub percentage: f64,
    /// Estimated seconds until all chunks are in
    pub eta_seconds: Option<u64>,
    /// Chunk bytes stored
    pub bytes_received: u64,
    /// Declared file size
    pub expected_size: Option<u64>,
    /// Duplicate frames seen
    pub duplicates: u64,
    /// Chunks that failed their checksum
    pub integrity_failures: u64,
    /// Indices that failed and have not been received intact since
    pub failed_chunks: Vec<usize>,
    /// Errors of any kind
    pub error_count: u64,
    /// Declared compression algorithm
    pub compression: Option<String>,
    /// Whether the payload is encrypted
    pub encrypted: bool,
    /// Declared FEC layout
    pub fec: Option<FecParams>,
    /// When the first frame arrived
    pub started_at: DateTime<Utc>,
    /// When the last frame arrived
    pub last_activity: DateTime<Utc>,
    /// Seconds since the first frame
    pub elapsed_seconds: f64,
    /// Outcome, once terminal
    pub outcome: Option<SessionOutcome>,
}
