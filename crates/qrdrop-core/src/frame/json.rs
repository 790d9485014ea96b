//! `qrfile/v1` and `qrfile/v2` JSON frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    check_range, decode_base64, encode_base64, normalize_checksum, FileMetadata, Frame,
    ParseError, WireFormat,
};
use crate::fec::FecParams;

/// Fields of a `qrfile/v2` frame.
#[derive(Debug, Serialize, Deserialize)]
struct V2Wire {
    fmt: String,
    index: u64,
    total: u64,
    data_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rs_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rs_blocks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rs_parity: Option<usize>,
}

/// Fields of a `qrfile/v1` frame.
#[derive(Debug, Serialize, Deserialize)]
struct V1Wire {
    fmt: String,
    index: u64,
    total: u64,
    data_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_hash: Option<String>,
    /// Emitted by some senders in place of `chunk_hash`
    #[serde(default, skip_serializing)]
    chunk_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algo: Option<String>,
}

fn require_count(map: &Map<String, Value>, field: &'static str) -> Result<usize, ParseError> {
    let value = map.get(field).ok_or(ParseError::MissingField(field))?;
    let n = value
        .as_u64()
        .ok_or_else(|| ParseError::invalid(field, format!("expected a non-negative integer, got {value}")))?;
    usize::try_from(n).map_err(|_| ParseError::invalid(field, "too large"))
}

fn check_digest(algo: Option<&str>) -> Result<(), ParseError> {
    match algo.map(str::trim) {
        None | Some("") => Ok(()),
        Some(name) if name.eq_ignore_ascii_case("sha256") => Ok(()),
        Some(name) => Err(ParseError::UnsupportedDigest(name.to_string())),
    }
}

pub(super) fn parse(format: WireFormat, map: Map<String, Value>) -> Result<Frame, ParseError> {
    let index = require_count(&map, "index")?;
    let total = require_count(&map, "total")?;
    if !map.contains_key("data_b64") {
        return Err(ParseError::MissingField("data_b64"));
    }
    if !map.get("data_b64").is_some_and(Value::is_string) {
        return Err(ParseError::invalid("data_b64", "expected a string"));
    }
    check_range(index, total)?;

    let object = Value::Object(map);
    match format {
        WireFormat::V2 => {
            let wire: V2Wire = serde_json::from_value(object)
                .map_err(|e| ParseError::invalid("metadata", e.to_string()))?;
            from_v2(wire, index, total)
        }
        WireFormat::V1 => {
            let wire: V1Wire = serde_json::from_value(object)
                .map_err(|e| ParseError::invalid("metadata", e.to_string()))?;
            from_v1(wire, index, total)
        }
        WireFormat::Simple => Err(ParseError::UnknownFormat),
    }
}

fn from_v2(wire: V2Wire, index: usize, total: usize) -> Result<Frame, ParseError> {
    check_digest(wire.algo.as_deref())?;
    let data = decode_base64(&wire.data_b64)?;

    let fec = if wire.rs_enabled.unwrap_or(false) {
        let blocks = wire.rs_blocks.ok_or(ParseError::MissingField("rs_blocks"))?;
        let parity = wire.rs_parity.ok_or(ParseError::MissingField("rs_parity"))?;
        Some(
            FecParams::new(blocks, parity)
                .map_err(|e| ParseError::invalid("rs_blocks", e.to_string()))?,
        )
    } else {
        None
    };

    Ok(Frame {
        format: WireFormat::V2,
        index,
        total,
        data,
        chunk_checksum: normalize_checksum(wire.chunk_sha256),
        meta: FileMetadata {
            name: wire.name.filter(|n| !n.is_empty()),
            size: wire.size,
            checksum: normalize_checksum(wire.file_sha256),
            compression: wire
                .compression_algorithm
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            compression_ratio: wire.compression_ratio,
            encrypted: wire.encryption_enabled.unwrap_or(false),
            fec,
        },
    })
}

fn from_v1(wire: V1Wire, index: usize, total: usize) -> Result<Frame, ParseError> {
    check_digest(wire.algo.as_deref())?;
    let data = decode_base64(&wire.data_b64)?;

    Ok(Frame {
        format: WireFormat::V1,
        index,
        total,
        data,
        chunk_checksum: normalize_checksum(wire.chunk_hash)
            .or_else(|| normalize_checksum(wire.chunk_sha256)),
        meta: FileMetadata {
            name: wire.name.filter(|n| !n.is_empty()),
            size: wire.size,
            ..FileMetadata::default()
        },
    })
}

pub(super) fn encode(frame: &Frame) -> String {
    let meta = &frame.meta;
    let result = match frame.format {
        WireFormat::V1 => serde_json::to_string(&V1Wire {
            fmt: "qrfile/v1".to_string(),
            index: frame.index as u64,
            total: frame.total as u64,
            data_b64: encode_base64(&frame.data),
            name: meta.name.clone(),
            size: meta.size,
            chunk_hash: frame.chunk_checksum.clone(),
            chunk_sha256: None,
            algo: frame.chunk_checksum.as_ref().map(|_| "sha256".to_string()),
        }),
        _ => serde_json::to_string(&V2Wire {
            fmt: "qrfile/v2".to_string(),
            index: frame.index as u64,
            total: frame.total as u64,
            data_b64: encode_base64(&frame.data),
            name: meta.name.clone(),
            size: meta.size,
            file_sha256: meta.checksum.clone(),
            chunk_sha256: frame.chunk_checksum.clone(),
            algo: Some("sha256".to_string()),
            compression_algorithm: meta.compression.clone(),
            compression_ratio: meta.compression_ratio,
            encryption_enabled: Some(meta.encrypted),
            rs_enabled: Some(meta.fec.is_some()),
            rs_blocks: meta.fec.map(|f| f.data_shards),
            rs_parity: meta.fec.map(|f| f.parity_shards),
        }),
    };
    // Plain structs of strings and numbers always serialize.
    result.unwrap_or_default()
}
