#![forbid(unsafe_code)]

//! Byte-range resolution for HTTP `Range` headers.
//!
//! This is a pure translation layer: header text plus the total resource
//! size in, a validated inclusive interval out. Only single ranges in the
//! `bytes` unit are supported; multi-range requests are refused as
//! unsatisfiable rather than silently serving the first part. Malformed
//! syntax falls back to the full-file response because strict rejection
//! breaks a surprising number of real players.

use std::fmt;

/// A contiguous, inclusive byte interval of a resource of `total` bytes.
///
/// Invariant for partial ranges: `start <= end < total`. The interval is
/// computed fresh for every request and never outlives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
    pub is_partial: bool,
}

impl ByteRange {
    /// The whole resource. For an empty file the interval degenerates to
    /// `[0, 0]` with a zero [`length`](Self::length).
    pub fn full(total: u64) -> Self {
        Self {
            start: 0,
            end: total.saturating_sub(1),
            total,
            is_partial: false,
        }
    }

    /// Number of body bytes this range covers. Must match both the declared
    /// `Content-Length` and the bytes actually written.
    pub fn length(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// The requested range cannot be honored against this resource size.
///
/// Callers must answer with 416 and `Content-Range: bytes */{total}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable {
    pub total: u64,
}

impl fmt::Display for Unsatisfiable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range not satisfiable for {} byte resource", self.total)
    }
}

impl std::error::Error for Unsatisfiable {}

/// Resolves an optional `Range` header value against a known size.
///
/// * absent header, or present but syntactically malformed → full file
/// * `bytes=A-B` → `[A, min(B, total-1)]`
/// * `bytes=A-` → `[A, total-1]`
/// * `bytes=-N` → last N bytes, clamped to the file start
/// * multi-range, `A > B`, `A >= total`, `bytes=-0`, or any range against an
///   empty file → [`Unsatisfiable`]
pub fn resolve(header: Option<&str>, total: u64) -> Result<ByteRange, Unsatisfiable> {
    let Some(header) = header else {
        return Ok(ByteRange::full(total));
    };
    match parse_spec(header, total) {
        Ok(Some((start, end))) => Ok(ByteRange {
            start,
            end,
            total,
            is_partial: true,
        }),
        Ok(None) => Ok(ByteRange::full(total)),
        Err(err) => Err(err),
    }
}

/// Inner parser. `Ok(None)` means "malformed, fall back to full file";
/// `Err` means a well-formed request that conflicts with the resource.
fn parse_spec(header: &str, total: u64) -> Result<Option<(u64, u64)>, Unsatisfiable> {
    let header = header.trim();
    let Some((unit, spec)) = header.split_once('=') else {
        return Ok(None);
    };
    if unit.trim() != "bytes" {
        return Ok(None);
    }

    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(None);
    }
    // Single-range server: "bytes=0-99,200-299" is refused outright instead
    // of serving a part the client did not ask for on its own.
    if spec.contains(',') {
        return Err(Unsatisfiable { total });
    }

    let Some((start_str, end_str)) = spec.split_once('-') else {
        return Ok(None);
    };
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    // Any explicit range against an empty file has no satisfiable interval.
    if total == 0 {
        return Err(Unsatisfiable { total });
    }

    if start_str.is_empty() {
        // Suffix form "-N": the last N bytes.
        let Ok(suffix) = end_str.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 {
            return Err(Unsatisfiable { total });
        }
        let start = total.saturating_sub(suffix);
        return Ok(Some((start, total - 1)));
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return Ok(None);
    };
    if start >= total {
        return Err(Unsatisfiable { total });
    }

    let end = if end_str.is_empty() {
        total - 1
    } else {
        let Ok(end) = end_str.parse::<u64>() else {
            return Ok(None);
        };
        if end < start {
            return Err(Unsatisfiable { total });
        }
        end.min(total - 1)
    };

    Ok(Some((start, end)))
}
