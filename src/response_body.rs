//! Response body reader (C4): framing (Content-Length / chunked / EOF),
//! transparent decompression, and the `BodyReader` pull interface.
//!
//! Grounded in `client/client.rs::BodyKind` and
//! `client/parser.rs::scan_headers`'s body-length algorithm (RFC 7230
//! §3.3.3) for the framing classification, and in `body_parser.rs`'s
//! `BodyProgress` for the idea of a small per-framing-kind state machine
//! driven one pull at a time. Decompression is new: the teacher has none,
//! so it is grounded in `flate2`'s `read::{GzDecoder, DeflateDecoder}`,
//! the crate several retrieval-pack HTTP clients use for this.

use std::io::{self, Read};
use std::sync::Arc;

use flate2::read::{DeflateDecoder, GzDecoder};

use chunked;
use connection::Connection;
use error::HttpExceptionContent;

/// Classification of how a message's body length is framed, per RFC 7230
/// §3.3.3. Grounded in the teacher's `client::client::BodyKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    Eof,
}

pub fn classify<'a>(
    is_head: bool,
    status: u16,
    headers: impl Iterator<Item = (&'a str, &'a [u8])>,
) -> Result<BodyKind, HttpExceptionContent> {
    if is_head || status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(BodyKind::Fixed(0));
    }
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            chunked = ::headers::is_chunked(value);
        } else if name.eq_ignore_ascii_case("Content-Length") {
            let text = std::str::from_utf8(value)
                .map_err(|_| HttpExceptionContent::InvalidHeader("Content-Length".into()))?;
            let n: u64 = text.trim().parse()
                .map_err(|_| HttpExceptionContent::InvalidHeader("Content-Length".into()))?;
            if let Some(existing) = content_length {
                if existing != n {
                    return Err(HttpExceptionContent::InvalidHeader(
                        "duplicate Content-Length".into()));
                }
            }
            content_length = Some(n);
        }
    }
    if chunked {
        Ok(BodyKind::Chunked)
    } else if let Some(n) = content_length {
        Ok(BodyKind::Fixed(n))
    } else {
        Ok(BodyKind::Eof)
    }
}

/// Marker wrapping a [`HttpExceptionContent`] so it survives a round trip
/// through `flate2`'s `io::Error`-typed `Read` interface.
#[derive(Debug)]
struct FramingError(HttpExceptionContent);

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FramingError {}

fn framing_io_error(content: HttpExceptionContent) -> io::Error {
    io::Error::new(io::ErrorKind::Other, FramingError(content))
}

fn unwrap_framing_error(err: io::Error) -> HttpExceptionContent {
    match err.into_inner() {
        Some(inner) => match inner.downcast::<FramingError>() {
            Ok(framing) => framing.0,
            Err(other) => HttpExceptionContent::HttpZlibException(io::Error::new(io::ErrorKind::Other, other)),
        },
        None => HttpExceptionContent::HttpZlibException(err),
    }
}

enum Framing {
    Fixed { total: u64, remaining: u64 },
    Chunked(chunked::State),
    Eof { done: bool },
}

/// A `std::io::Read` adapter over the raw (not-yet-decompressed) framing
/// stage, so it can be handed to `flate2`'s decoders. Each `read()` call
/// makes at most one `Connection::read()` call for `Fixed`/`Eof` framing;
/// `Chunked` framing may additionally need to read a chunk-size line or
/// trailing CRLF, which are small, bounded metadata reads rather than
/// body data.
struct FramingSource {
    conn: Connection,
    framing: Framing,
}

impl Read for FramingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = match self.framing {
            Framing::Fixed { ref mut remaining, total } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let got = self.conn.read().map_err(framing_io_error)?;
                if got.is_empty() {
                    return Err(framing_io_error(HttpExceptionContent::ResponseBodyTooShort(
                        total, total - *remaining,
                    )));
                }
                if got.len() as u64 <= *remaining {
                    *remaining -= got.len() as u64;
                    got
                } else {
                    let take = *remaining as usize;
                    let (mine, rest) = got.split_at(take);
                    self.conn.unread(rest.to_vec()).map_err(framing_io_error)?;
                    *remaining = 0;
                    mine.to_vec()
                }
            }
            Framing::Chunked(ref mut state) => state.pull(&self.conn).map_err(framing_io_error)?,
            Framing::Eof { ref mut done } => {
                if *done {
                    return Ok(0);
                }
                let got = self.conn.read().map_err(framing_io_error)?;
                if got.is_empty() {
                    *done = true;
                }
                got
            }
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.conn.unread(chunk[n..].to_vec()).map_err(framing_io_error)?;
        }
        Ok(n)
    }
}

enum Decoder {
    Identity(FramingSource),
    Gzip(Box<GzDecoder<FramingSource>>),
    Deflate(Box<DeflateDecoder<FramingSource>>),
}

/// Recognised `Content-Encoding` values this crate knows how to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn from_header(value: &[u8]) -> Option<ContentEncoding> {
        let text = std::str::from_utf8(value).ok()?.trim();
        if text.eq_ignore_ascii_case("gzip") || text.eq_ignore_ascii_case("x-gzip") {
            Some(ContentEncoding::Gzip)
        } else if text.eq_ignore_ascii_case("deflate") {
            Some(ContentEncoding::Deflate)
        } else {
            None
        }
    }
}

/// A chunk-at-a-time decoded response body reader (C4's "consumer
/// exposure" stage). An empty chunk is the sole EOF signal; calls after
/// EOF keep returning empty rather than erroring.
pub struct BodyReader {
    decoder: Decoder,
    eof: bool,
    read_buf_size: usize,
    /// Invoked exactly once, the moment EOF is first observed — the
    /// manager wires this to the matching `ResponseClose::release`, so a
    /// fully-drained body returns its connection to the pool without the
    /// caller having to remember to close anything (spec.md §4.4's
    /// "closing the response" rule, applied automatically on the common
    /// path; an early abort still goes through `ResponseClose::close`).
    on_drained: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl BodyReader {
    /// Build a reader over `conn` framed as `body_kind`, optionally
    /// decompressing `encoding` if both `decompress` returned true for
    /// the advertised mime type and `raw_body` is false (spec.md §4.4
    /// step 2).
    pub fn new(conn: Connection, body_kind: BodyKind, encoding: Option<ContentEncoding>) -> BodyReader {
        let framing = match body_kind {
            BodyKind::Fixed(n) => Framing::Fixed { total: n, remaining: n },
            BodyKind::Chunked => Framing::Chunked(chunked::State::new()),
            BodyKind::Eof => Framing::Eof { done: false },
        };
        let source = FramingSource { conn, framing };
        let decoder = match encoding {
            None => Decoder::Identity(source),
            Some(ContentEncoding::Gzip) => Decoder::Gzip(Box::new(GzDecoder::new(source))),
            Some(ContentEncoding::Deflate) => Decoder::Deflate(Box::new(DeflateDecoder::new(source))),
        };
        BodyReader { decoder, eof: false, read_buf_size: 16 * 1024, on_drained: None }
    }

    /// Register the callback fired once, the first time EOF is observed.
    pub fn set_on_drained(&mut self, f: Arc<dyn Fn() + Send + Sync>) {
        self.on_drained = Some(f);
    }

    /// Pull the next decoded chunk. Never blocks the caller beyond the
    /// underlying framing stage's single network read.
    pub fn next_chunk(&mut self) -> Result<Vec<u8>, HttpExceptionContent> {
        if self.eof {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; self.read_buf_size];
        let n = match self.decoder {
            Decoder::Identity(ref mut s) => s.read(&mut buf),
            Decoder::Gzip(ref mut d) => d.read(&mut buf),
            Decoder::Deflate(ref mut d) => d.read(&mut buf),
        }.map_err(unwrap_framing_error)?;
        if n == 0 {
            self.eof = true;
            if let Some(ref f) = self.on_drained {
                f();
            }
            return Ok(Vec::new());
        }
        buf.truncate(n);
        Ok(buf)
    }
}
