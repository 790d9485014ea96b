//! Colon-delimited simple frames.
//!
//! Two shapes share the `F:` prefix:
//!
//! - positional `F:<index>:<total>:<base64>`
//! - keyed `F:<name>:I:<index>:T:<total>:D:<base64>`
//!
//! Everything after the last structural colon is the base64 payload,
//! taken verbatim.

use super::{
    check_range, decode_base64, encode_base64, FileMetadata, Frame, ParseError, WireFormat,
};

fn parse_count(field: &'static str, text: &str) -> Result<usize, ParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::invalid(
            field,
            format!("expected a non-negative integer, got '{text}'"),
        ));
    }
    text.parse()
        .map_err(|_| ParseError::invalid(field, "too large"))
}

/// Split off the next colon-terminated segment.
fn take_segment<'a>(rest: &'a str, field: &'static str) -> Result<(&'a str, &'a str), ParseError> {
    rest.split_once(':').ok_or(ParseError::MissingField(field))
}

/// Expect a literal `<tag>:` marker at the start of `rest`.
fn expect_tag<'a>(rest: &'a str, tag: &str, field: &'static str) -> Result<&'a str, ParseError> {
    rest.strip_prefix(tag)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or(ParseError::MissingField(field))
}

/// Parse the text after the `F:` prefix.
pub(super) fn parse(rest: &str) -> Result<Frame, ParseError> {
    let (first, after_first) = take_segment(rest, "total")?;

    if let Some(keyed) = after_first.strip_prefix("I:") {
        return parse_keyed(first, keyed);
    }

    let index = parse_count("index", first)?;
    let (total, data) = take_segment(after_first, "data")?;
    let total = parse_count("total", total)?;
    build(index, total, data, None)
}

fn parse_keyed(name: &str, rest: &str) -> Result<Frame, ParseError> {
    if name.is_empty() {
        return Err(ParseError::invalid("name", "must not be empty"));
    }
    let (index, rest) = take_segment(rest, "total")?;
    let index = parse_count("index", index)?;
    let rest = expect_tag(rest, "T", "total")?;
    let (total, rest) = take_segment(rest, "data")?;
    let total = parse_count("total", total)?;
    let data = expect_tag(rest, "D", "data")?;
    build(index, total, data, Some(name.to_string()))
}

fn build(index: usize, total: usize, data: &str, name: Option<String>) -> Result<Frame, ParseError> {
    check_range(index, total)?;
    let data = decode_base64(data)?;
    Ok(Frame {
        format: WireFormat::Simple,
        index,
        total,
        data,
        chunk_checksum: None,
        meta: FileMetadata {
            name,
            ..FileMetadata::default()
        },
    })
}

pub(super) fn encode(frame: &Frame) -> String {
    let data = encode_base64(&frame.data);
    match frame.meta.name.as_deref() {
        Some(name) if !name.is_empty() && !name.contains(':') => {
            format!("F:{name}:I:{}:T:{}:D:{data}", frame.index, frame.total)
        }
        _ => format!("F:{}:{}:{data}", frame.index, frame.total),
    }
}
