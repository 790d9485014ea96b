//! Per-algorithm encoders and bounded decoders.

use std::io::{self, Cursor, Read, Write};

/// Why a bounded decode stopped.
#[derive(Debug)]
pub(super) enum DecodeError {
    /// Output would exceed the limit
    TooLarge,
    /// Stream is not valid for the algorithm
    Corrupt(String),
}

type DecodeResult = Result<Vec<u8>, DecodeError>;

const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

/// Drain a reader, failing once more than `limit` bytes come out.
fn read_bounded<R: Read>(reader: R, limit: u64) -> DecodeResult {
    let mut out = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    if out.len() as u64 > limit {
        return Err(DecodeError::TooLarge);
    }
    Ok(out)
}

/// A `Vec` sink that refuses writes past `limit`.
struct BoundedWriter {
    buf: Vec<u8>,
    limit: u64,
    overflowed: bool,
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if (self.buf.len() + data.len()) as u64 > self.limit {
            self.overflowed = true;
            return Err(io::Error::other("output limit reached"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(super) fn store_decode(data: &[u8], limit: u64) -> DecodeResult {
    if data.len() as u64 > limit {
        return Err(DecodeError::TooLarge);
    }
    Ok(data.to_vec())
}

pub(super) fn gzip_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(super) fn gzip_decode(data: &[u8], limit: u64) -> DecodeResult {
    read_bounded(flate2::read::GzDecoder::new(data), limit)
}

pub(super) fn bz2_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(super) fn bz2_decode(data: &[u8], limit: u64) -> DecodeResult {
    read_bounded(bzip2::read::BzDecoder::new(data), limit)
}

pub(super) fn xz_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut input = data;
    lzma_rs::xz_compress(&mut input, &mut out)?;
    Ok(out)
}

/// Decode xz, or a legacy `.lzma` stream when the xz magic is absent.
pub(super) fn lzma_decode(data: &[u8], limit: u64) -> DecodeResult {
    let mut writer = BoundedWriter {
        buf: Vec::new(),
        limit,
        overflowed: false,
    };
    let mut input = data;
    let result = if data.starts_with(&XZ_MAGIC) {
        lzma_rs::xz_decompress(&mut input, &mut writer)
    } else {
        lzma_rs::lzma_decompress(&mut input, &mut writer)
    };

    match result {
        Ok(()) => Ok(writer.buf),
        Err(_) if writer.overflowed => Err(DecodeError::TooLarge),
        Err(e) => Err(DecodeError::Corrupt(e.to_string())),
    }
}

pub(super) fn brotli_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut compressed = Vec::new();
    {
        let mut compressor = brotli::CompressorWriter::new(&mut compressed, 4096, 11, 22);
        compressor.write_all(data)?;
    }
    Ok(compressed)
}

pub(super) fn brotli_decode(data: &[u8], limit: u64) -> DecodeResult {
    read_bounded(brotli::Decompressor::new(data, 4096), limit)
}

pub(super) fn zstd_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    zstd::stream::encode_all(Cursor::new(data), 3)
}

pub(super) fn zstd_decode(data: &[u8], limit: u64) -> DecodeResult {
    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    read_bounded(decoder, limit)
}

pub(super) fn lz4_encode(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data)?;
    encoder.finish().map_err(io::Error::other)
}

pub(super) fn lz4_decode(data: &[u8], limit: u64) -> DecodeResult {
    read_bounded(lz4_flex::frame::FrameDecoder::new(data), limit)
}
