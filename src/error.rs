//! Error taxonomy (C8).
//!
//! Mirrors the two-tier shape the teacher's `client/errors.rs` uses for a
//! single connection: most failures are tagged with the request that
//! caused them ([`HttpException::Request`]); URL parsing failures (out of
//! this crate's scope, but the type a caller-supplied URL layer would
//! raise) carry no request at all ([`HttpException::InvalidUrl`]).

use std::error;
use std::fmt;
use std::io;

use request::Request;

quick_error! {
    /// The body of a [`HttpException::Request`] — everything that can go
    /// wrong once a request is in flight.
    #[derive(Debug)]
    pub enum HttpExceptionContent {
        /// Raised by opt-in helpers on non-2xx responses; never raised by
        /// the core itself.
        StatusCodeException(status: u16, body_prefix: Vec<u8>) {
            description("non-2xx status code")
            display("server returned {}", status)
        }
        /// A redirect loop exceeded `redirect_count`.
        TooManyRedirects(hops: u32) {
            description("too many redirects")
            display("too many redirects ({} hops)", hops)
        }
        /// A single header or the status line exceeded 4096 bytes before
        /// an LF was found.
        OverlongHeaders {
            description("header line exceeded the 4096 byte limit")
        }
        /// Headers were not received within the request's deadline.
        ResponseTimeout {
            description("timed out waiting for response headers")
        }
        /// A connection dial did not complete within its deadline.
        ConnectionTimeout {
            description("timed out connecting")
        }
        /// Dialing a fresh connection failed.
        ConnectionFailure(err: io::Error) {
            description("connection failed")
            display("connection failed: {}", err)
        }
        /// The status line could not be parsed.
        InvalidStatusLine(raw: String) {
            description("invalid status line")
            display("invalid status line: {:?}", raw)
        }
        /// A header line could not be parsed.
        InvalidHeader(raw: String) {
            description("invalid header")
            display("invalid header: {:?}", raw)
        }
        /// A user-supplied header contained a bare CR or LF.
        InvalidRequestHeader(raw: String) {
            description("invalid request header")
            display("invalid request header: {:?}", raw)
        }
        /// A transport-level failure that could not be attributed to a
        /// more specific cause.
        InternalException(err: io::Error) {
            description("internal I/O error")
            display("internal error: {}", err)
        }
        /// `CONNECT` to the proxy did not return 2xx.
        ProxyConnectException(host: String, port: u16, status: u16) {
            description("proxy CONNECT failed")
            display("CONNECT {}:{} via proxy returned {}", host, port, status)
        }
        /// The socket closed before a single byte of the response arrived.
        /// Plausibly the peer closed an idle keep-alive connection; the
        /// manager may retry such failures.
        NoResponseDataReceived {
            description("no response data received")
        }
        /// TLS was requested but the manager has no TLS dialer configured.
        TlsNotSupported {
            description("TLS requested but this manager has no TLS dialer")
        }
        /// A `Stream` request body popper produced a different number of
        /// bytes than the declared `Content-Length`.
        WrongRequestBodyStreamSize(expected: u64, actual: u64) {
            description("request body stream size mismatch")
            display("expected to send {} bytes but sent {}", expected, actual)
        }
        /// The peer closed the connection before `Content-Length` bytes of
        /// response body arrived.
        ResponseBodyTooShort(expected: u64, actual: u64) {
            description("response body shorter than Content-Length")
            display("expected {} bytes of body but got {}", expected, actual)
        }
        /// Malformed chunk framing.
        InvalidChunkHeaders {
            description("invalid chunk headers")
        }
        /// EOF was reached before the header block was terminated.
        IncompleteHeaders {
            description("connection closed before headers were complete")
        }
        /// The request's host was empty.
        InvalidDestinationHost(host: String) {
            description("invalid destination host")
            display("invalid destination host: {:?}", host)
        }
        /// The streaming gzip/deflate inflater failed.
        HttpZlibException(err: io::Error) {
            description("decompression error")
            display("decompression error: {}", err)
        }
        /// A proxy environment variable could not be parsed.
        InvalidProxyEnvironmentVariable(name: String, value: String) {
            description("invalid proxy environment variable")
            display("invalid value for {}: {:?}", name, value)
        }
        /// An operation was attempted on an already-closed connection.
        ConnectionClosed {
            description("connection closed")
        }
        /// Platform proxy discovery failed.
        InvalidProxySettings(text: String) {
            description("invalid proxy settings")
            display("invalid proxy settings: {}", text)
        }
    }
}

/// The crate's single error currency.
#[derive(Debug)]
pub enum HttpException {
    /// URL parsing failed before any [`Request`] could be built.
    InvalidUrl { url: String, reason: String },
    /// A failure associated with an in-flight request.
    Request(Box<Request>, HttpExceptionContent),
}

impl HttpException {
    pub fn request(req: &Request, content: HttpExceptionContent) -> HttpException {
        HttpException::Request(Box::new(req.without_body()), content)
    }

    /// The inner content, if this is a request-scoped error.
    pub fn content(&self) -> Option<&HttpExceptionContent> {
        match *self {
            HttpException::Request(_, ref content) => Some(content),
            HttpException::InvalidUrl { .. } => None,
        }
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HttpException::InvalidUrl { ref url, ref reason } => {
                write!(f, "invalid URL {:?}: {}", url, reason)
            }
            HttpException::Request(ref req, ref content) => {
                write!(f, "request to {}:{}{} failed: {}", req.host, req.port, req.path, content)
            }
        }
    }
}

impl error::Error for HttpException {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            HttpException::Request(_, ref content) => Some(content),
            HttpException::InvalidUrl { .. } => None,
        }
    }
}

/// Whether an in-flight error happened while using a connection checked out
/// from the pool (a "reused" connection) versus a freshly dialed one.
///
/// Only errors on reused connections are eligible for the single
/// transparent retry described in spec.md §4.5/§7.
pub fn is_retry_eligible(content: &HttpExceptionContent, reused: bool) -> bool {
    use self::HttpExceptionContent::*;
    reused
        && matches!(
            content,
            NoResponseDataReceived | InternalException(_) | ConnectionFailure(_)
        )
}
