//! Reconstruction pipeline.
//!
//! Runs once per session, when the last chunk arrives, and turns the stored
//! chunks back into the original file.
//!
//! ## Stages
//!
//! | Stage | Progress | Skipped when |
//! |---|---|---|
//! | Assemble | 0-30 | never |
//! | Correct | 30-50 | no FEC declared |
//! | Decrypt | 50-70 | not encrypted |
//! | Decompress | 70-90 | `store` or no algorithm declared |
//! | Verify | 90-100 | never; passes unverified without a checksum |
//!
//! Error correction failures degrade to the uncorrected buffer with a
//! warning. Every other stage failure is fatal for the session.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::pipeline::{Pipeline, PipelineOptions};
//!
//! let pipeline = Pipeline::new(PipelineOptions::default());
//! let file = pipeline.run(&mut session)?;
//! println!("{} bytes, sha256 {}", file.data.len(), file.sha256_hex);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::compression::{self, CompressionAlgorithm};
use crate::config::PipelineConfig;
use crate::crypto::{self, KeyMaterial};
use crate::error::{Error, Result, StageError};
use crate::fec;
use crate::session::{Session, SessionId, SessionOutcome, SessionState};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Concatenate chunks
    Assemble,
    /// Reed-Solomon correction
    Correct,
    /// AES-256-GCM decryption
    Decrypt,
    /// Decompression
    Decompress,
    /// File checksum verification
    Verify,
}

impl Stage {
    /// Progress at the start and end of the stage.
    #[must_use]
    pub const fn range(self) -> (f64, f64) {
        match self {
            Self::Assemble => (0.0, 30.0),
            Self::Correct => (30.0, 50.0),
            Self::Decrypt => (50.0, 70.0),
            Self::Decompress => (70.0, 90.0),
            Self::Verify => (90.0, 100.0),
        }
    }

    const fn state(self) -> SessionState {
        match self {
            Self::Assemble => SessionState::Assembling,
            Self::Correct => SessionState::CorrectingErrors,
            Self::Decrypt => SessionState::Decrypting,
            Self::Decompress => SessionState::Decompressing,
            Self::Verify => SessionState::Verifying,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Assemble => "assemble",
            Self::Correct => "correct",
            Self::Decrypt => "decrypt",
            Self::Decompress => "decompress",
            Self::Verify => "verify",
        })
    }
}

/// A progress event emitted at each stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Session being reconstructed
    pub session_id: SessionId,
    /// Current stage
    pub stage: Stage,
    /// Overall progress (0.0 - 100.0)
    pub percentage: f64,
    /// Size of the working buffer
    pub bytes: u64,
}

/// Receiver of pipeline progress events.
pub trait ProgressSink: Send + Sync {
    /// Called at the start and end of every stage that runs.
    fn report(&self, progress: StageProgress);
}

/// Discards progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _progress: StageProgress) {}
}

/// Forwards progress events to a closure.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(StageProgress) + Send + Sync,
{
    fn report(&self, progress: StageProgress) {
        (self.0)(progress);
    }
}

impl ProgressSink for mpsc::UnboundedSender<StageProgress> {
    fn report(&self, progress: StageProgress) {
        let _ = self.send(progress);
    }
}

impl ProgressSink for watch::Sender<Option<StageProgress>> {
    fn report(&self, progress: StageProgress) {
        self.send_replace(Some(progress));
    }
}

/// Knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run Reed-Solomon correction when declared
    pub fec_enabled: bool,
    /// Candidate erasure sets tried per decode
    pub max_fec_trials: usize,
    /// Ceiling on the assembled buffer and decompressed output
    pub max_output_size: u64,
    /// Key material for encrypted transfers
    pub key: Option<KeyMaterial>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            fec_enabled: config.fec_enabled,
            max_fec_trials: config.max_fec_trials,
            max_output_size: config.max_output_size,
            key: None,
        }
    }
}

impl PipelineOptions {
    /// Set the key material.
    #[must_use]
    pub fn with_key(mut self, key: Option<KeyMaterial>) -> Self {
        self.key = key;
        self
    }
}

/// A reconstructed file.
#[derive(Debug, Clone)]
pub struct Reconstructed {
    /// File contents
    pub data: Vec<u8>,
    /// SHA-256 of the contents
    pub sha256_hex: String,
    /// Bytes repaired by error correction
    pub corrected_symbols: usize,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Whether a declared checksum was checked
    pub verified: bool,
}

/// Runs the reconstruction stages over a complete session.
#[derive(Clone)]
pub struct Pipeline {
    options: PipelineOptions,
    sink: Arc<dyn ProgressSink>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

struct Run<'a> {
    sink: &'a dyn ProgressSink,
    id: SessionId,
    warnings: Vec<String>,
}

impl Run<'_> {
    fn enter(&self, session: &mut Session, stage: Stage, bytes: usize) {
        session.set_state(stage.state());
        self.emit(stage, stage.range().0, bytes);
    }

    fn leave(&self, stage: Stage, bytes: usize) {
        self.emit(stage, stage.range().1, bytes);
    }

    fn emit(&self, stage: Stage, percentage: f64, bytes: usize) {
        self.sink.report(StageProgress {
            session_id: self.id.clone(),
            stage,
            percentage,
            bytes: bytes as u64,
        });
    }
}

impl Pipeline {
    /// Create a pipeline that discards progress events.
    #[must_use]
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            sink: Arc::new(NullSink),
        }
    }

    /// Send progress events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use `key` for encrypted payloads.
    #[must_use]
    pub fn with_key(mut self, key: Option<KeyMaterial>) -> Self {
        self.options.key = key;
        self
    }

    /// The options in use.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Reconstruct the file of a complete session.
    ///
    /// The session ends `Completed` on success and `Failed` otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error of the first fatal stage.
    pub fn run(&self, session: &mut Session) -> Result<Reconstructed> {
        let mut run = Run {
            sink: self.sink.as_ref(),
            id: session.id().clone(),
            warnings: Vec::new(),
        };

        if !session.is_complete() {
            return Err(Error::Internal(format!(
                "session {} is missing {} chunks",
                run.id,
                session.missing_chunks().len()
            )));
        }

        match self.execute(session, &mut run) {
            Ok(file) => {
                session.complete(SessionOutcome {
                    final_size: file.data.len() as u64,
                    sha256: Some(file.sha256_hex.clone()),
                    verified: file.verified,
                    corrected_symbols: file.corrected_symbols,
                    warnings: file.warnings.clone(),
                    failure: None,
                    saved_to: None,
                });
                tracing::info!(
                    session_id = %run.id,
                    size = file.data.len(),
                    verified = file.verified,
                    corrected_symbols = file.corrected_symbols,
                    "File reconstructed"
                );
                Ok(file)
            }
            Err(e) => {
                tracing::error!(session_id = %run.id, error = %e, "Reconstruction failed");
                session.fail(e.to_string(), run.warnings);
                Err(e)
            }
        }
    }

    fn execute(&self, session: &mut Session, run: &mut Run<'_>) -> Result<Reconstructed> {
        let meta = session.meta().clone();

        run.enter(session, Stage::Assemble, 0);
        let assembled = session.assembled_len() as u64;
        if assembled > self.options.max_output_size {
            return Err(StageError::OutputTooLarge {
                limit: self.options.max_output_size,
            }
            .into());
        }
        let mut data = session.assemble();
        run.leave(Stage::Assemble, data.len());

        let mut corrected_symbols = 0;
        if let Some(params) = meta.fec {
            if self.options.fec_enabled {
                run.enter(session, Stage::Correct, data.len());
                match fec::decode(&data, params, self.options.max_fec_trials) {
                    Ok(decoded) => {
                        corrected_symbols = decoded.corrected_symbols;
                        data = decoded.payload;
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %run.id,
                            error = %e,
                            "Error correction failed, continuing with uncorrected data"
                        );
                        run.warnings.push(format!("{e}; continuing with uncorrected data"));
                    }
                }
                run.leave(Stage::Correct, data.len());
            } else {
                run.warnings
                    .push("error correction declared but disabled; data passed through".to_string());
            }
        }

        if meta.encrypted {
            run.enter(session, Stage::Decrypt, data.len());
            let key = self.options.key.as_ref().ok_or(StageError::MissingKey)?;
            data = crypto::open(&data, key)?;
            run.leave(Stage::Decrypt, data.len());
        }

        if let Some(name) = meta.compression.as_deref() {
            let algorithm = CompressionAlgorithm::from_name(name)
                .ok_or_else(|| StageError::UnsupportedCompression(name.to_string()))?;
            if !algorithm.is_store() {
                run.enter(session, Stage::Decompress, data.len());
                data = compression::decompress(algorithm, &data, self.options.max_output_size)?;
                run.leave(Stage::Decompress, data.len());
            }
        }

        run.enter(session, Stage::Verify, data.len());
        let sha256_hex = crypto::sha256_hex(&data);
        let verified = match meta.checksum.as_deref() {
            Some(expected) => {
                if !crypto::checksum_matches(expected, &sha256_hex) {
                    return Err(Error::FileChecksumMismatch {
                        file: session.display_name(),
                        expected: expected.to_string(),
                        actual: crypto::matching_prefix(expected, &sha256_hex).to_string(),
                    });
                }
                true
            }
            None => false,
        };
        if let Some(size) = meta.size {
            if size != data.len() as u64 {
                run.warnings.push(format!(
                    "declared size {size} differs from reconstructed size {}",
                    data.len()
                ));
            }
        }
        run.leave(Stage::Verify, data.len());

        Ok(Reconstructed {
            data,
            sha256_hex,
            corrected_symbols,
            warnings: std::mem::take(&mut run.warnings),
            verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::FecParams;
    use crate::frame::{FileMetadata, Frame, WireFormat};

    fn session_for(payload: &[u8], chunk_size: usize, meta: FileMetadata) -> Session {
        let chunks: Vec<&[u8]> = payload.chunks(chunk_size.max(1)).collect();
        let total = chunks.len().max(1);
        let frames: Vec<Frame> = (0..total)
            .map(|index| Frame {
                format: WireFormat::V2,
                index,
                total,
                data: chunks.get(index).map_or_else(Vec::new, |c| c.to_vec()),
                chunk_checksum: None,
                meta: meta.clone(),
            })
            .collect();

        let mut session = Session::new(SessionId::derive(&frames[0]), &frames[0]);
        for frame in frames.into_iter().rev() {
            session.apply(frame, u64::MAX);
        }
        session
    }

    #[test]
    fn test_plain_unverified() {
        let mut session = session_for(b"ABC", 1, FileMetadata::default());
        let file = Pipeline::new(PipelineOptions::default()).run(&mut session).unwrap();

        assert_eq!(file.data, b"ABC");
        assert!(!file.verified);
        assert_eq!(file.sha256_hex, crypto::sha256_hex(b"ABC"));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.outcome().unwrap().final_size, 3);
    }

    #[test]
    fn test_gzip_verified() {
        let packed = compression::compress(CompressionAlgorithm::Gzip, b"HELLO").unwrap();
        let meta = FileMetadata {
            compression: Some("gzip".to_string()),
            checksum: Some(crypto::sha256_hex(b"HELLO")[..16].to_string()),
            ..FileMetadata::default()
        };
        let mut session = session_for(&packed, 7, meta);
        let file = Pipeline::new(PipelineOptions::default()).run(&mut session).unwrap();

        assert_eq!(file.data, b"HELLO");
        assert!(file.verified);
    }

    #[test]
    fn test_fec_corrects_corruption() {
        let params = FecParams::new(4, 2).unwrap();
        let mut encoded = fec::encode(b"forward error correction", params).unwrap();
        encoded[1] ^= 0xFF;
        let mut session = session_for(&encoded, 5, fec_meta(params));
        let file = Pipeline::new(PipelineOptions::default()).run(&mut session).unwrap();

        assert_eq!(file.data, b"forward error correction");
        assert_eq!(file.corrected_symbols, 1);
        assert!(file.warnings.is_empty());
    }

    fn fec_meta(params: FecParams) -> FileMetadata {
        FileMetadata {
            fec: Some(params),
            ..FileMetadata::default()
        }
    }

    #[test]
    fn test_fec_failure_falls_back_with_warning() {
        let params = FecParams::new(4, 2).unwrap();
        let mut encoded = fec::encode(&b"beyond repair".repeat(8), params).unwrap();
        let shard_len = encoded.len() / params.total();
        for i in 0..shard_len {
            encoded[i] ^= 0x5A;
            #[allow(clippy::cast_possible_truncation)]
            let flip = (i as u8).wrapping_add(1);
            encoded[shard_len + i] ^= flip;
        }
        let received = encoded.clone();

        let mut session = session_for(&encoded, 16, fec_meta(params));
        let file = Pipeline::new(PipelineOptions::default()).run(&mut session).unwrap();

        assert_eq!(file.data, received);
        assert_eq!(file.warnings.len(), 1);
        assert!(file.warnings[0].contains("uncorrected"));
    }

    #[test]
    fn test_missing_key_fails_session() {
        let key = KeyMaterial::Passphrase("secret".to_string());
        let sealed = crypto::seal(b"classified", &key).unwrap();
        let meta = FileMetadata {
            encrypted: true,
            ..FileMetadata::default()
        };
        let mut session = session_for(&sealed, 8, meta);
        let err = Pipeline::new(PipelineOptions::default())
            .run(&mut session)
            .unwrap_err();

        assert!(matches!(err, Error::Stage(StageError::MissingKey)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.outcome().unwrap().failure.is_some());
    }

    #[test]
    fn test_wrong_and_right_key() {
        let key = KeyMaterial::Passphrase("secret".to_string());
        let sealed = crypto::seal(b"classified", &key).unwrap();
        let meta = FileMetadata {
            encrypted: true,
            ..FileMetadata::default()
        };

        let mut session = session_for(&sealed, 8, meta.clone());
        let wrong = PipelineOptions::default()
            .with_key(Some(KeyMaterial::Passphrase("guess".to_string())));
        assert!(matches!(
            Pipeline::new(wrong).run(&mut session),
            Err(Error::Stage(StageError::Decrypt(_)))
        ));

        let mut session = session_for(&sealed, 8, meta);
        let right = PipelineOptions::default().with_key(Some(key));
        assert_eq!(Pipeline::new(right).run(&mut session).unwrap().data, b"classified");
    }

    #[test]
    fn test_unknown_compression_is_fatal() {
        let meta = FileMetadata {
            compression: Some("rar".to_string()),
            ..FileMetadata::default()
        };
        let mut session = session_for(b"data", 4, meta);
        assert!(matches!(
            Pipeline::new(PipelineOptions::default()).run(&mut session),
            Err(Error::Stage(StageError::UnsupportedCompression(name))) if name == "rar"
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let meta = FileMetadata {
            checksum: Some("00000000".to_string()),
            ..FileMetadata::default()
        };
        let mut session = session_for(b"data", 4, meta);
        let err = Pipeline::new(PipelineOptions::default())
            .run(&mut session)
            .unwrap_err();

        assert!(matches!(err, Error::FileChecksumMismatch { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_output_ceiling() {
        let options = PipelineOptions {
            max_output_size: 2,
            ..PipelineOptions::default()
        };
        let mut session = session_for(b"ABC", 1, FileMetadata::default());
        assert!(matches!(
            Pipeline::new(options).run(&mut session),
            Err(Error::Stage(StageError::OutputTooLarge { limit: 2 }))
        ));
    }

    #[test]
    fn test_size_mismatch_warns() {
        let meta = FileMetadata {
            size: Some(10),
            ..FileMetadata::default()
        };
        let mut session = session_for(b"ABC", 1, meta);
        let file = Pipeline::new(PipelineOptions::default()).run(&mut session).unwrap();
        assert_eq!(file.warnings.len(), 1);
    }

    #[test]
    fn test_progress_events_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let packed = compression::compress(CompressionAlgorithm::Zstd, b"HELLO").unwrap();
        let meta = FileMetadata {
            compression: Some("zstd".to_string()),
            ..FileMetadata::default()
        };
        let mut session = session_for(&packed, 4, meta);
        Pipeline::new(PipelineOptions::default())
            .with_sink(Arc::new(tx))
            .run(&mut session)
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Assemble,
                Stage::Assemble,
                Stage::Decompress,
                Stage::Decompress,
                Stage::Verify,
                Stage::Verify
            ]
        );
        assert!(events.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert!((events.last().unwrap().percentage - 100.0).abs() < f64::EPSILON);
        assert_eq!(events.last().unwrap().bytes, 5);
    }

    #[test]
    fn test_watch_and_fn_sinks() {
        let (tx, rx) = watch::channel(None);
        let mut session = session_for(b"AB", 1, FileMetadata::default());
        Pipeline::new(PipelineOptions::default())
            .with_sink(Arc::new(tx))
            .run(&mut session)
            .unwrap();
        assert_eq!(rx.borrow().as_ref().map(|p| p.stage), Some(Stage::Verify));

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink = FnSink(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let mut session = session_for(b"AB", 1, FileMetadata::default());
        Pipeline::new(PipelineOptions::default())
            .with_sink(Arc::new(sink))
            .run(&mut session)
            .unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 4);
    }
}
