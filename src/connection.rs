//! The connection abstraction (C1): a uniform byte stream with
//! `read`/`unread`/`write`/`close` semantics, layered over a raw TCP
//! socket or over TLS.
//!
//! Grounded in the teacher's close-signalling pattern (an `Arc<AtomicBool>`
//! shared between the encoder and parser halves in `client/encoder.rs` /
//! `client/parser.rs`) generalized to a single idempotent close shared by
//! every handle to the connection. Where the teacher drives everything
//! through `tokio_core::io::Io` + `tk_bufstream`, spec.md §5 mandates
//! blocking I/O, so the transport here is a concrete `std::net::TcpStream`
//! or `native_tls::TlsStream<TcpStream>`.
//!
//! Ownership mirrors Rust's own `Drop` rather than the source's manual
//! weak-reference finalizer (spec.md §9 offers this as an explicit
//! alternative): [`Inner`] closes its transport in its `Drop` impl, so a
//! [`Connection`] whose last handle goes out of scope without an explicit
//! `close()` still reaches the transport exactly once.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use native_tls::TlsStream;

use error::HttpExceptionContent;

/// A single read never returns more than this many bytes; matches the
/// teacher's preference for small, fixed socket-read buffers (see
/// `tk-bufstream`'s default chunk size) over one giant allocation.
const READ_CHUNK: usize = 16 * 1024;

enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match *self {
            Transport::Tcp(ref s) => s.set_read_timeout(timeout),
            Transport::Tls(ref s) => s.get_ref().set_read_timeout(timeout),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Transport::Tcp(ref mut s) => s.read(buf),
            Transport::Tls(ref mut s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Transport::Tcp(ref mut s) => s.write(buf),
            Transport::Tls(ref mut s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Transport::Tcp(ref mut s) => s.flush(),
            Transport::Tls(ref mut s) => s.flush(),
        }
    }
}

struct Inner {
    transport: Mutex<Option<Transport>>,
    pushback: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl Inner {
    fn close_once(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Dropping the transport closes the underlying fd/TLS session.
            *self.transport.lock().unwrap() = None;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close_once();
    }
}

/// A bidirectional byte stream with a LIFO pushback buffer and idempotent
/// close, shared by cloning (the pool and an in-flight request never hold
/// a clone simultaneously — checkout moves ownership, it does not alias
/// it).
#[derive(Clone)]
pub struct Connection(Arc<Inner>);

impl Connection {
    fn new(transport: Transport) -> Connection {
        Connection(Arc::new(Inner {
            transport: Mutex::new(Some(transport)),
            pushback: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Connection {
        Connection::new(Transport::Tcp(stream))
    }

    pub(crate) fn from_tls(stream: TlsStream<TcpStream>) -> Connection {
        Connection::new(Transport::Tls(Box::new(stream)))
    }

    /// Two handles are the same connection iff they share the same
    /// underlying transport. Used to mechanise the "pool at-most-once"
    /// property (spec.md §8.7): concurrent checkouts must never yield
    /// handles that compare equal.
    pub fn is_same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn fail_if_closed(&self) -> Result<(), HttpExceptionContent> {
        if self.0.closed.load(Ordering::SeqCst) {
            Err(HttpExceptionContent::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Read the next chunk of bytes. An empty `Vec` means EOF. Pops the
    /// pushback stack first; only consults the transport once the stack is
    /// empty, and never concatenates a pushback entry with freshly read
    /// transport bytes, nor two transport reads with each other.
    pub fn read(&self) -> Result<Vec<u8>, HttpExceptionContent> {
        self.fail_if_closed()?;
        {
            let mut stack = self.0.pushback.lock().unwrap();
            if let Some(bytes) = stack.pop() {
                return Ok(bytes);
            }
        }
        let mut buf = vec![0u8; READ_CHUNK];
        let mut guard = self.0.transport.lock().unwrap();
        let transport = match guard.as_mut() {
            Some(t) => t,
            None => return Err(HttpExceptionContent::ConnectionClosed),
        };
        let n = transport.read(&mut buf)
            .map_err(HttpExceptionContent::InternalException)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Push bytes back so the next `read()` returns exactly them. Unreads
    /// compose LIFO: `unread(a); unread(b)` is read back as `b` then `a`.
    /// An empty unread is a no-op.
    pub fn unread(&self, bytes: Vec<u8>) -> Result<(), HttpExceptionContent> {
        self.fail_if_closed()?;
        if bytes.is_empty() {
            return Ok(());
        }
        self.0.pushback.lock().unwrap().push(bytes);
        Ok(())
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), HttpExceptionContent> {
        self.fail_if_closed()?;
        let mut guard = self.0.transport.lock().unwrap();
        let transport = match guard.as_mut() {
            Some(t) => t,
            None => return Err(HttpExceptionContent::ConnectionClosed),
        };
        transport.write_all(bytes).map_err(HttpExceptionContent::InternalException)
    }

    /// Idempotent: only the first call reaches the transport.
    pub fn close(&self) {
        self.0.close_once();
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let guard = self.0.transport.lock().unwrap();
        match guard.as_ref() {
            Some(t) => t.set_read_timeout(timeout),
            None => Ok(()),
        }
    }

    /// Take ownership of the underlying TCP stream, consuming the
    /// connection. Used only to upgrade a freshly-dialed, not-yet-shared
    /// proxy tunnel to TLS after a successful `CONNECT` (manager step 4 of
    /// spec.md §4.6); fails if any other handle to this connection is
    /// still alive, or if it is carrying TLS already.
    pub(crate) fn into_raw_tcp_stream(self) -> Result<TcpStream, HttpExceptionContent> {
        let inner = Arc::try_unwrap(self.0)
            .map_err(|_| HttpExceptionContent::InternalException(
                io::Error::new(io::ErrorKind::Other, "connection has other live handles")))?;
        match inner.transport.into_inner().unwrap() {
            Some(Transport::Tcp(stream)) => Ok(stream),
            Some(Transport::Tls(_)) => Err(HttpExceptionContent::InternalException(
                io::Error::new(io::ErrorKind::Other, "connection is already TLS"))),
            None => Err(HttpExceptionContent::ConnectionClosed),
        }
    }
}
