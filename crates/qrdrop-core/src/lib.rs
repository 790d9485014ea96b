//! # QrDrop Core Library
//!
//! `qrdrop-core` reconstructs files transmitted as sequences of QR codes.
//! Each scanned payload carries one chunk; the receiver collects chunks in
//! any order, tolerates duplicates, and once every chunk is in runs the
//! reconstruction pipeline.
//!
//! ## Features
//!
//! - **Three wire formats**: `qrfile/v2` JSON, legacy `qrfile/v1` JSON and
//!   colon-delimited simple frames
//! - **Integrity checks**: truncated SHA-256 prefixes per chunk and per file
//! - **Error correction**: Reed-Solomon shards repair corrupted payloads
//! - **Encryption**: AES-256-GCM with HKDF-derived keys
//! - **Compression**: gzip, bz2, lzma, brotli, zstd and lz4
//!
//! ## Modules
//!
//! - [`compression`] - Compression algorithms
//! - [`config`] - Configuration management
//! - [`crypto`] - Hashing, checksum matching and the encryption envelope
//! - [`fec`] - Reed-Solomon forward error correction
//! - [`frame`] - Payload detection and parsing
//! - [`output`] - Destinations for reconstructed files
//! - [`pipeline`] - Reconstruction stages and progress reporting
//! - [`qr`] - QR rendering for sender payloads
//! - [`receiver`] - The receiver engine
//! - [`sender`] - Reference sender
//! - [`session`] - Reception sessions and the session registry
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::{Config, ReceiverEngine};
//!
//! let engine = ReceiverEngine::new(&Config::load()?);
//! for payload in ["F:0:2:SGVs", "F:1:2:bG8="] {
//!     let response = engine.process_frame(payload).await;
//!     println!("{}", response.message);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod compression;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fec;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod qr;
pub mod receiver;
pub mod sender;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use frame::{Frame, FrameParser, WireFormat};
pub use receiver::{FrameResponse, FrameStatus, ReceiverEngine};
pub use session::{SessionId, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of the session identifier in hex characters
pub const SESSION_ID_LEN: usize = 16;
