//! `Range` header handling for snapshot downloads
//!
//! Only the first range of a `bytes=` header is honoured. A header that does
//! not parse is ignored and the whole file is served.

use std::sync::OnceLock;

use regex::Regex;

use crate::{Error, Result};

static BYTE_RANGE: OnceLock<Option<Regex>> = OnceLock::new();

fn byte_range_pattern() -> Option<&'static Regex> {
    BYTE_RANGE
        .get_or_init(|| Regex::new(r"^\s*(\d*)\s*-\s*(\d*)\s*$").ok())
        .as_ref()
}

/// A syntactically valid byte range, before it is checked against a file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-` or `start-end`, end inclusive
    From { start: u64, end: Option<u64> },
    /// `-n`: the last n bytes
    Suffix(u64),
}

/// What to send for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Full,
    /// Inclusive span
    Partial { start: u64, end: u64 },
}

impl Selection {
    pub fn len(&self, total: u64) -> u64 {
        match *self {
            Selection::Full => total,
            Selection::Partial { start, end } => end - start + 1,
        }
    }

    pub fn start(&self) -> u64 {
        match *self {
            Selection::Full => 0,
            Selection::Partial { start, .. } => start,
        }
    }

    /// `Content-Range` value for partial responses
    pub fn content_range(&self, total: u64) -> Option<String> {
        match *self {
            Selection::Full => None,
            Selection::Partial { start, end } => Some(format!("bytes {}-{}/{}", start, end, total)),
        }
    }
}

/// Parse a `Range` header value. `None` means "treat as absent".
pub fn parse(header: &str) -> Option<ByteRange> {
    let (unit, spec) = header.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }
    let first = spec.split(',').next()?;
    let caps = byte_range_pattern()?.captures(first)?;

    let start = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty());
    let end = caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty());

    match (start, end) {
        (Some(start), end) => {
            let start = start.parse().ok()?;
            let end = match end {
                Some(end) => Some(end.parse().ok()?),
                None => None,
            };
            if matches!(end, Some(end) if end < start) {
                return None;
            }
            Some(ByteRange::From { start, end })
        }
        (None, Some(suffix)) => suffix.parse().ok().map(ByteRange::Suffix),
        (None, None) => None,
    }
}

/// Decide what part of a `total`-byte file a request gets.
///
/// Returns [`Error::Range`] when the range cannot be satisfied.
pub fn select(header: Option<&str>, total: u64) -> Result<Selection> {
    let Some(range) = header.and_then(parse) else {
        return Ok(Selection::Full);
    };

    match range {
        ByteRange::From { start, .. } if start >= total => Err(Error::Range(format!(
            "start {} is beyond the file size {}",
            start, total
        ))),
        ByteRange::From { start, end } => {
            let last = total - 1;
            Ok(Selection::Partial {
                start,
                end: end.map_or(last, |e| e.min(last)),
            })
        }
        ByteRange::Suffix(0) => Err(Error::Range("empty suffix range".to_string())),
        ByteRange::Suffix(_) if total == 0 => Err(Error::Range("file is empty".to_string())),
        ByteRange::Suffix(n) => Ok(Selection::Partial {
            start: total.saturating_sub(n),
            end: total - 1,
        }),
    }
}
