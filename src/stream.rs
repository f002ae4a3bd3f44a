#![forbid(unsafe_code)]

//! Byte-range streaming responder.
//!
//! One implementation serves every media endpoint: it opens a fresh,
//! request-scoped read handle, seeks to the validated range, and streams the
//! window to the client in fixed-size chunks so memory per stream stays
//! O(chunk) no matter how large the file is. Concurrent requests never share
//! a handle, so there is no read cursor to race on.
//!
//! Failure discipline follows HTTP's fundamental asymmetry: everything
//! detected before the first body byte becomes a proper 404/416/500, while
//! anything after that point can only surface as an aborted connection plus
//! a log line. A client that goes away mid-stream is routine (debug), a disk
//! read that fails is not (warn).

use std::{
    fmt,
    future::Future,
    io,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_core::Stream;
use mime_guess::mime::Mime;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    time::Sleep,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::range;

/// Default read chunk. Small enough that a few hundred concurrent streams
/// cost megabytes, large enough to keep syscall overhead irrelevant.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// A streamable file as resolved by the catalog collaborator.
///
/// `size_bytes` is the size the catalog recorded at publish time; it must
/// still match the on-disk length when the stream opens, otherwise the read
/// fails with [`StreamError::SizeMismatch`] rather than serving a frame
/// count that contradicts the declared headers.
#[derive(Debug, Clone)]
pub struct MediaResource {
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: Mime,
}

/// Per-process streaming tunables, resolved once from config.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Fixed read buffer per in-flight stream.
    pub chunk_bytes: usize,
    /// Optional cap on how long a single chunk read may make no progress
    /// before the stream is aborted. Reclaims streams wedged on a bad disk;
    /// slow clients are unaffected because backpressure suspends the stream
    /// without consuming this budget.
    pub stall_timeout: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            stall_timeout: None,
        }
    }
}

/// Failures detected before any body byte is written.
///
/// Everything here still has a chance to become a clean status code; the
/// binary maps `NotFound` to 404 and the rest to 500. Unsatisfiable ranges
/// are not listed because they produce a complete 416 response, not an
/// error.
#[derive(Debug)]
pub enum StreamError {
    /// The backing file vanished between catalog lookup and open.
    NotFound,
    /// On-disk length no longer matches what the catalog recorded.
    SizeMismatch { expected: u64, actual: u64 },
    /// Filesystem-level failure (permissions, device errors).
    Io(io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "backing file not found"),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "backing file is {actual} bytes but catalog recorded {expected}"
            ),
            Self::Io(err) => write!(f, "filesystem error: {err}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(err)
        }
    }
}

/// Serves `resource` as one complete HTTP response honoring `range_header`.
///
/// Returns `Ok` for every outcome that is expressible as a response,
/// including 416; `Err` only for pre-body failures the caller must translate
/// (missing file, size drift, filesystem errors).
pub async fn respond(
    resource: &MediaResource,
    range_header: Option<&str>,
    settings: &StreamSettings,
) -> Result<Response, StreamError> {
    let mut file = File::open(&resource.path).await?;
    let actual = file.metadata().await.map_err(StreamError::Io)?.len();
    if actual != resource.size_bytes {
        return Err(StreamError::SizeMismatch {
            expected: resource.size_bytes,
            actual,
        });
    }

    let range = match range::resolve(range_header, resource.size_bytes) {
        Ok(range) => range,
        Err(unsatisfiable) => return Ok(unsatisfiable_response(unsatisfiable.total)),
    };

    if range.is_partial {
        file.seek(io::SeekFrom::Start(range.start))
            .await
            .map_err(StreamError::Io)?;
    }

    // `take` bounds the full-file path too: if the file grows mid-flight we
    // still send exactly the bytes the headers promised.
    let reader = ReaderStream::with_capacity(file.take(range.length()), settings.chunk_bytes);
    let metered = MeteredStream::new(reader, &resource.id, range.length(), settings.stall_timeout);

    let mut response = Body::from_stream(metered).into_response();
    if range.is_partial {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        response
            .headers_mut()
            .insert(header::CONTENT_RANGE, range.content_range().parse().unwrap());
    }
    response.headers_mut().insert(
        header::CONTENT_LENGTH,
        range.length().to_string().parse().unwrap(),
    );
    apply_common_headers(&mut response, &resource.content_type);
    Ok(response)
}

/// `416 Range Not Satisfiable` with the star form of `Content-Range` so the
/// client learns the actual size for its retry.
fn unsatisfiable_response(total: u64) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    response.headers_mut().insert(
        header::CONTENT_RANGE,
        format!("bytes */{total}").parse().unwrap(),
    );
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response
}

/// Headers shared by 200 and 206. `Accept-Ranges` goes on every success so
/// players discover seek support from the very first probe.
fn apply_common_headers(response: &mut Response, content_type: &Mime) {
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    if let Ok(value) = content_type.to_string().parse() {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
}

/// Wraps the chunked file stream with transfer accounting.
///
/// The wrapper is what makes mid-stream outcomes observable: a client that
/// disconnects drops the body, so `Drop` fires with bytes still outstanding
/// (logged at debug, not an application fault); a failed disk read surfaces
/// as an `Err` chunk (logged at warn) which makes hyper abort the connection
/// instead of finishing a response whose length would lie.
struct MeteredStream<S> {
    inner: S,
    label: String,
    expected: u64,
    sent: u64,
    done: bool,
    stall_timeout: Option<Duration>,
    stall: Option<Pin<Box<Sleep>>>,
}

impl<S> MeteredStream<S> {
    fn new(inner: S, label: &str, expected: u64, stall_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            label: label.to_owned(),
            expected,
            sent: 0,
            done: false,
            stall_timeout,
            stall: None,
        }
    }
}

impl<S> Stream for MeteredStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                this.stall = None;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                warn!(
                    resource = %this.label,
                    sent = this.sent,
                    expected = this.expected,
                    error = %err,
                    "read failed mid-stream, aborting connection"
                );
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some(timeout) = this.stall_timeout {
                    let stall = this
                        .stall
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                    if stall.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        warn!(
                            resource = %this.label,
                            sent = this.sent,
                            expected = this.expected,
                            "stream stalled, aborting connection"
                        );
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "stream made no progress within the stall timeout",
                        ))));
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        // Dropped before completion: the client hung up or the server is
        // shutting the connection down. Routine, but worth a trace.
        if !self.done && self.sent < self.expected {
            debug!(
                resource = %self.label,
                sent = self.sent,
                expected = self.expected,
                "client disconnected mid-stream"
            );
        }
    }
}
