//! Response / ResponseHead / ResponseClose (C7).
//!
//! Grounded in the teacher's `client/head.rs` for the borrowed header view
//! that strips hop-by-hop headers, generalized to an owned `Response<Body>`
//! parametric over its body type the way spec.md §3 describes.

use std::sync::{Arc, Mutex};

use cookie::CookieJar;
use pool::{ConnKey, Pool};
use connection::Connection;
use request::{HeaderList, Request};
use status::StatusCode;
use version::Version;

/// Header names that describe the connection itself rather than the
/// message content; stripped from [`ResponseHead::headers`] the way the
/// teacher's `client/head.rs::HeaderIter` strips them before handing
/// headers to application code.
fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("Connection")
        || name.eq_ignore_ascii_case("Content-Length")
        || name.eq_ignore_ascii_case("Transfer-Encoding")
        || name.eq_ignore_ascii_case("Keep-Alive")
        || name.eq_ignore_ascii_case("Proxy-Authenticate")
        || name.eq_ignore_ascii_case("Proxy-Authorization")
        || name.eq_ignore_ascii_case("TE")
        || name.eq_ignore_ascii_case("Trailer")
        || name.eq_ignore_ascii_case("Upgrade")
}

/// A borrowed view over a response's status line and headers, handed to
/// [`crate::request::CheckResponse`] before the body is exposed to the
/// caller.
pub struct ResponseHead<'a> {
    pub status: StatusCode,
    pub reason: &'a str,
    pub version: Version,
    all_headers: &'a [(String, Vec<u8>)],
}

impl<'a> ResponseHead<'a> {
    pub fn new(status: StatusCode, reason: &'a str, version: Version, all_headers: &'a [(String, Vec<u8>)]) -> Self {
        ResponseHead { status, reason, version, all_headers }
    }

    /// Headers with hop-by-hop framing headers stripped — what application
    /// code almost always wants.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.all_headers.iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    /// Every header, including hop-by-hop ones. An escape hatch for
    /// callers that need to see `Connection`/`Transfer-Encoding` etc.
    /// directly (proxies, diagnostics).
    pub fn all_headers(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.all_headers.iter().map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.all_headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// Idempotent bridge from "response body in use" back to "connection
/// idle or discarded" (spec.md §3/§5). Exactly one of (body drained to
/// EOF, `close()` called explicitly) determines the connection's fate;
/// whichever happens first wins, and the other becomes a no-op.
pub struct ResponseClose {
    inner: Arc<Mutex<Option<CloseAction>>>,
}

struct CloseAction {
    pool: Arc<Pool>,
    key: ConnKey,
    conn: Connection,
    /// Set when the server's response headers carried `Connection:
    /// close` — the connection must never be returned to the pool
    /// regardless of how the body finished.
    server_wants_close: bool,
    /// Fired once, after the connection actually goes back to the pool
    /// (not on an early `close()`) — wired to the request's
    /// `put-idle-connection` trace hook.
    on_put_idle: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ResponseClose {
    pub(crate) fn new(pool: Arc<Pool>, key: ConnKey, conn: Connection, server_wants_close: bool) -> ResponseClose {
        ResponseClose {
            inner: Arc::new(Mutex::new(Some(CloseAction {
                pool, key, conn, server_wants_close, on_put_idle: None,
            }))),
        }
    }

    /// Register the callback fired once the connection is actually
    /// returned to the pool.
    pub(crate) fn set_on_put_idle(&self, f: Arc<dyn Fn() + Send + Sync>) {
        if let Some(ref mut action) = *self.inner.lock().unwrap() {
            action.on_put_idle = Some(f);
        }
    }

    /// Called automatically once the body reaches EOF (spec.md §4.4):
    /// return the connection to the pool unless the server asked for
    /// `Connection: close`, in which case it is destroyed instead.
    pub fn release(&self) {
        if let Some(action) = self.inner.lock().unwrap().take() {
            if action.server_wants_close {
                action.conn.close();
            } else {
                action.pool.put_back(action.key, action.conn);
                if let Some(ref f) = action.on_put_idle {
                    f();
                }
            }
        }
    }

    /// Destroy the connection instead of returning it — used on any
    /// framing error, or the caller abandoning the response early
    /// (spec.md §5's cooperative cancellation: closing this handle makes
    /// the reader surface a transport error on its next read).
    pub fn close(&self) {
        if let Some(action) = self.inner.lock().unwrap().take() {
            action.conn.close();
        }
    }
}

impl Clone for ResponseClose {
    fn clone(&self) -> ResponseClose {
        ResponseClose { inner: self.inner.clone() }
    }
}

/// A full response (C7), parametric over its body representation —
/// typically [`crate::response_body::BodyReader`].
pub struct Response<Body> {
    pub status: StatusCode,
    pub reason: String,
    pub version: Version,
    pub response_headers: HeaderList,
    pub body: Body,
    pub cookie_jar: CookieJar,
    pub close: ResponseClose,
    pub request: Request,
}

impl<Body> Response<Body> {
    pub fn head(&self) -> ResponseHead {
        ResponseHead::new(self.status, &self.reason, self.version, &self.response_headers)
    }

    pub fn map_body<B2>(self, f: impl FnOnce(Body) -> B2) -> Response<B2> {
        Response {
            status: self.status,
            reason: self.reason,
            version: self.version,
            response_headers: self.response_headers,
            body: f(self.body),
            cookie_jar: self.cookie_jar,
            close: self.close,
            request: self.request,
        }
    }
}
