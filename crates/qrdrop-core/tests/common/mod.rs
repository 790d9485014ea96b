//! Common test utilities for `QrDrop` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use qrdrop_core::config::Config;
use qrdrop_core::crypto::KeyMaterial;
use qrdrop_core::output::MemorySink;
use qrdrop_core::receiver::{FrameResponse, ReceiverEngine};
use qrdrop_core::sender::{self, SenderOptions};

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Compressible text of roughly `size` bytes.
pub fn text_bytes(size: usize) -> Vec<u8> {
    b"All work and no play makes a dull transfer. "
        .iter()
        .copied()
        .cycle()
        .take(size)
        .collect()
}

/// An engine that keeps files in memory, plus a handle to that memory.
pub fn memory_engine(config: &Config, key: Option<KeyMaterial>) -> (ReceiverEngine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = ReceiverEngine::new(config)
        .with_output(sink.clone())
        .with_key(key);
    (engine, sink)
}

/// Encode `data` and return the payload strings.
pub fn payloads(data: &[u8], options: &SenderOptions) -> Vec<String> {
    sender::encode(data, options)
        .expect("Failed to encode transfer")
        .payloads()
}

/// Feed payloads in order and return every response.
pub async fn feed(engine: &ReceiverEngine, payloads: &[String]) -> Vec<FrameResponse> {
    let mut responses = Vec::with_capacity(payloads.len());
    for payload in payloads {
        responses.push(engine.process_frame(payload).await);
    }
    responses
}

/// Deterministic shuffle so failures are reproducible.
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    let mut out = items.to_vec();
    out.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
    out
}
