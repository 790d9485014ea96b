//! Reed-Solomon forward error correction over GF(2^8).
//!
//! An encoded payload is `data + parity` equal-length shards, data shards
//! first. The data shards joined together hold
//! `u32 big-endian length || payload || zero padding`.
//!
//! Erasure codes need to know which shards are bad. QR frames arrive with
//! per-chunk checksums but shard boundaries do not line up with chunks, so
//! the decoder locates corrupt shards itself: it erases candidate sets of
//! growing size and keeps the first reconstruction that verifies. With `p`
//! parity shards up to `p / 2` corrupt shards are located this way.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::fec::{self, FecParams};
//!
//! let params = FecParams::new(4, 2)?;
//! let encoded = fec::encode(b"hello", params)?;
//! let decoded = fec::decode(&encoded, params, 4096)?;
//! assert_eq!(decoded.payload, b"hello");
//! ```

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StageError};

/// Bytes of the length prefix inside the data region.
const LENGTH_PREFIX: usize = 4;

/// Maximum total shards for GF(2^8).
pub const MAX_SHARDS: usize = 256;

/// Shard layout of an FEC-encoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FecParams {
    /// Number of data shards
    pub data_shards: usize,
    /// Number of parity shards
    pub parity_shards: usize,
}

impl FecParams {
    /// Validate a shard layout.
    ///
    /// # Errors
    ///
    /// Returns an error if either count is zero or the total exceeds 256.
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(Error::Fec(
                "data and parity shard counts must be positive".to_string(),
            ));
        }
        match data_shards.checked_add(parity_shards) {
            Some(total) if total <= MAX_SHARDS => {}
            _ => {
                return Err(Error::Fec(format!(
                    "{data_shards} data + {parity_shards} parity shards exceed the GF(2^8) limit of {MAX_SHARDS}"
                )));
            }
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    /// Total shard count.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.data_shards.saturating_add(self.parity_shards)
    }

    /// How many corrupt shards the decoder can locate and repair.
    #[must_use]
    pub const fn correctable(&self) -> usize {
        self.parity_shards / 2
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecDecoded {
    /// The recovered payload
    pub payload: Vec<u8>,
    /// Number of bytes that differed from what was received
    pub corrected_symbols: usize,
    /// Indices of the shards that were rebuilt
    pub repaired_shards: Vec<usize>,
}

fn codec(params: FecParams) -> std::result::Result<ReedSolomon, reed_solomon_erasure::Error> {
    ReedSolomon::new(params.data_shards, params.parity_shards)
}

/// Encode a payload into data and parity shards, concatenated.
///
/// # Errors
///
/// Returns an error if the payload is too large for the length prefix or
/// the codec rejects the layout.
pub fn encode(payload: &[u8], params: FecParams) -> Result<Vec<u8>> {
    let params = FecParams::new(params.data_shards, params.parity_shards)?;
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::Fec("payload exceeds 4 GiB".to_string()))?;

    let region = LENGTH_PREFIX + payload.len();
    let shard_len = region.div_ceil(params.data_shards).max(1);

    let mut data = Vec::with_capacity(shard_len * params.data_shards);
    data.extend_from_slice(&length.to_be_bytes());
    data.extend_from_slice(payload);
    data.resize(shard_len * params.data_shards, 0);

    let mut shards: Vec<Vec<u8>> = data.chunks(shard_len).map(<[u8]>::to_vec).collect();
    shards.resize(params.total(), vec![0u8; shard_len]);

    codec(params)
        .and_then(|rs| rs.encode(&mut shards))
        .map_err(|e| Error::Fec(format!("encode failed: {e:?}")))?;

    Ok(shards.concat())
}

/// Decode shards, locating and repairing up to `p / 2` corrupt shards.
///
/// `max_trials` bounds the number of candidate erasure sets tried.
///
/// # Errors
///
/// Returns [`StageError::Fec`] when the buffer does not split into shards,
/// corruption cannot be located within the budget, or the recovered length
/// prefix is inconsistent.
pub fn decode(
    encoded: &[u8],
    params: FecParams,
    max_trials: usize,
) -> std::result::Result<FecDecoded, StageError> {
    let params = FecParams::new(params.data_shards, params.parity_shards)
        .map_err(|e| StageError::Fec(e.to_string()))?;
    let total = params.total();
    if encoded.is_empty() || encoded.len() % total != 0 {
        return Err(StageError::Fec(format!(
            "{} bytes do not split into {total} equal shards",
            encoded.len()
        )));
    }
    let shard_len = encoded.len() / total;
    let received: Vec<Vec<u8>> = encoded.chunks(shard_len).map(<[u8]>::to_vec).collect();

    let rs = codec(params).map_err(|e| StageError::Fec(format!("{e:?}")))?;
    let intact = rs
        .verify(&received)
        .map_err(|e| StageError::Fec(format!("{e:?}")))?;

    if intact {
        return Ok(FecDecoded {
            payload: extract(&received[..params.data_shards])?,
            corrected_symbols: 0,
            repaired_shards: Vec::new(),
        });
    }

    let mut trials = 0usize;
    for size in 1..=params.correctable() {
        let mut erased: Vec<usize> = (0..size).collect();
        loop {
            if trials >= max_trials {
                return Err(StageError::Fec(format!(
                    "corrupt shards not located within {max_trials} trials"
                )));
            }
            trials += 1;

            if let Some(repaired) = try_erasure(&rs, &received, &erased) {
                let corrected_symbols = received
                    .iter()
                    .zip(&repaired)
                    .map(|(a, b)| a.iter().zip(b).filter(|(x, y)| x != y).count())
                    .sum();
                tracing::debug!(
                    trials,
                    shards = ?erased,
                    corrected_symbols,
                    "FEC: located corrupt shards"
                );
                return Ok(FecDecoded {
                    payload: extract(&repaired[..params.data_shards])?,
                    corrected_symbols,
                    repaired_shards: erased,
                });
            }

            if !next_combination(&mut erased, total) {
                break;
            }
        }
    }

    Err(StageError::Fec(format!(
        "more than {} of {total} shards are corrupt",
        params.correctable()
    )))
}

fn try_erasure(rs: &ReedSolomon, received: &[Vec<u8>], erased: &[usize]) -> Option<Vec<Vec<u8>>> {
    let mut shards: Vec<Option<Vec<u8>>> = received
        .iter()
        .enumerate()
        .map(|(i, shard)| (!erased.contains(&i)).then(|| shard.clone()))
        .collect();

    rs.reconstruct(&mut shards).ok()?;
    let rebuilt = shards.into_iter().collect::<Option<Vec<Vec<u8>>>>()?;
    rs.verify(&rebuilt).ok()?.then_some(rebuilt)
}

/// Advance `indices` to the next k-combination of `0..n` in lexicographic order.
fn next_combination(indices: &mut [usize], n: usize) -> bool {
    let k = indices.len();
    for i in (0..k).rev() {
        if indices[i] < n - k + i {
            indices[i] += 1;
            for j in i + 1..k {
                indices[j] = indices[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

fn extract(data_shards: &[Vec<u8>]) -> std::result::Result<Vec<u8>, StageError> {
    let region = data_shards.concat();
    if region.len() < LENGTH_PREFIX {
        return Err(StageError::Fec("data region shorter than length prefix".to_string()));
    }
    let (prefix, rest) = region.split_at(LENGTH_PREFIX);
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let length = u32::from_be_bytes(len_bytes) as usize;

    if length > rest.len() {
        return Err(StageError::Fec(format!(
            "declared length {length} exceeds the {} byte data region",
            rest.len()
        )));
    }
    Ok(rest[..length].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(d: usize, p: usize) -> FecParams {
        FecParams::new(d, p).unwrap()
    }

    #[test]
    fn test_params_validation() {
        assert!(FecParams::new(0, 2).is_err());
        assert!(FecParams::new(4, 0).is_err());
        assert!(FecParams::new(200, 57).is_err());
        assert_eq!(params(4, 4).correctable(), 2);
    }

    #[test]
    fn test_overflowing_layout_rejected() {
        assert!(FecParams::new(usize::MAX, 1).is_err());
        assert!(FecParams::new(1, usize::MAX).is_err());

        let forged = FecParams {
            data_shards: usize::MAX,
            parity_shards: 1,
        };
        assert_eq!(forged.total(), usize::MAX);
        assert!(matches!(
            decode(&[0u8; 16], forged, 16),
            Err(StageError::Fec(_))
        ));
        assert!(encode(b"data", forged).is_err());
    }

    #[test]
    fn test_clean_decode() {
        let payload = b"forward error correction".to_vec();
        let encoded = encode(&payload, params(4, 2)).unwrap();
        assert_eq!(encoded.len() % 6, 0);

        let decoded = decode(&encoded, params(4, 2), 4096).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.corrected_symbols, 0);
        assert!(decoded.repaired_shards.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let encoded = encode(b"", params(2, 2)).unwrap();
        let decoded = decode(&encoded, params(2, 2), 16).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_single_corrupt_shard_repaired() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let p = params(5, 2);
        let mut encoded = encode(&payload, p).unwrap();
        let shard_len = encoded.len() / p.total();

        encoded[shard_len * 2 + 3] ^= 0xFF;
        encoded[shard_len * 2 + 7] ^= 0x10;

        let decoded = decode(&encoded, p, 4096).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.corrected_symbols, 2);
        assert_eq!(decoded.repaired_shards, vec![2]);
    }

    #[test]
    fn test_two_corrupt_shards_with_four_parity() {
        let payload = b"two bad shards out of eight".repeat(10);
        let p = params(4, 4);
        let mut encoded = encode(&payload, p).unwrap();
        let shard_len = encoded.len() / p.total();

        encoded[0] ^= 0x01;
        encoded[shard_len * 6] ^= 0x01;

        let decoded = decode(&encoded, p, 4096).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.repaired_shards, vec![0, 6]);
    }

    #[test]
    fn test_too_many_corrupt_shards() {
        let payload = b"beyond repair".repeat(8);
        let p = params(4, 2);
        let mut encoded = encode(&payload, p).unwrap();
        let shard_len = encoded.len() / p.total();

        for i in 0..shard_len {
            encoded[i] ^= 0x5A;
            #[allow(clippy::cast_possible_truncation)]
            let flip = (i as u8).wrapping_add(1);
            encoded[shard_len + i] ^= flip;
        }

        assert!(matches!(decode(&encoded, p, 4096), Err(StageError::Fec(_))));
    }

    #[test]
    fn test_trial_budget() {
        let payload = b"budget".repeat(30);
        let p = params(8, 4);
        let mut encoded = encode(&payload, p).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let err = decode(&encoded, p, 3).unwrap_err();
        assert!(err.to_string().contains("3 trials"));
    }

    #[test]
    fn test_misaligned_buffer() {
        assert!(decode(&[1, 2, 3, 4, 5], params(2, 1), 16).is_err());
        assert!(decode(&[], params(2, 1), 16).is_err());
    }

    #[test]
    fn test_next_combination() {
        let mut idx = vec![0, 1];
        let mut seen = vec![idx.clone()];
        while next_combination(&mut idx, 4) {
            seen.push(idx.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
    }
}
