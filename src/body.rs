//! Request body model and the canonical send algorithm (C3).
//!
//! Grounded in the teacher's `MessageState`/`Encoder` split
//! (`base_serializer.rs`, `client/encoder.rs`): headers are written first
//! (`Content-Length` xor `Transfer-Encoding: chunked`), then body bytes.
//! Here the whole algorithm is a single function ([`send`]) operating on a
//! [`Connection`] directly, since this crate's bodies are blocking values
//! rather than a stateful per-connection serializer object.

use std::sync::Arc;

use chunked;
use connection::Connection;
use error::HttpExceptionContent;
use popper::{Popper, PopperFactory};

/// A callback that decides, given an I/O error encountered while writing
/// the request body, whether to swallow it (the server may have already
/// sent a response and closed its side) or rethrow it.
pub type OnBodyWriteError = Arc<dyn Fn(&HttpExceptionContent) -> bool + Send + Sync>;

/// Effectful producer of a `RequestBody`, evaluated at send time.
pub type Deferred = Arc<dyn Fn() -> Result<RequestBody, HttpExceptionContent> + Send + Sync>;

/// Tagged variant of the possible request bodies (spec.md §3).
#[derive(Clone)]
pub enum RequestBody {
    /// Fully buffered, length known.
    Bytes(Vec<u8>),
    /// Lazy byte builder, length known. The builder is a list of
    /// independently-produced chunks concatenated at send time — the
    /// rope-like deferred-concatenation abstraction spec.md §9 asks for,
    /// standing in for the source's lazy byte builder.
    Builder(u64, Arc<dyn Fn() -> Vec<Vec<u8>> + Send + Sync>),
    /// Fixed length, produced incrementally.
    Stream(u64, Arc<dyn PopperFactory>),
    /// Unknown length, sent using HTTP chunked transfer-encoding.
    ChunkedStream(Arc<dyn PopperFactory>),
    /// An effectful producer of one of the above, evaluated at send time.
    Deferred(Deferred),
}

impl RequestBody {
    pub fn empty() -> RequestBody {
        RequestBody::Bytes(Vec::new())
    }

    /// The body's length if statically known (not `Deferred`, not
    /// `ChunkedStream`).
    pub fn known_length(&self) -> Option<u64> {
        match *self {
            RequestBody::Bytes(ref b) => Some(b.len() as u64),
            RequestBody::Builder(n, _) => Some(n),
            RequestBody::Stream(n, _) => Some(n),
            RequestBody::ChunkedStream(_) => None,
            RequestBody::Deferred(_) => None,
        }
    }

    /// Resolve one level of `Deferred`, if present.
    fn resolve(self) -> Result<RequestBody, HttpExceptionContent> {
        match self {
            RequestBody::Deferred(f) => f(),
            other => Ok(other),
        }
    }

    /// Monoidal concatenation (spec.md §4.3 "Body composition").
    ///
    /// `Deferred` bodies cannot participate in pure composition — spec.md
    /// §9 leaves this an open question and explicitly says not to guess a
    /// well-typed resolution, so this preserves the source's behaviour:
    /// it is a programmer error, reported as a panic rather than silently
    /// resolved or silently dropped.
    pub fn concat(self, other: RequestBody) -> RequestBody {
        use self::RequestBody::*;
        match (self, other) {
            (Deferred(_), _) | (_, Deferred(_)) => {
                panic!("RequestBody::concat: Deferred bodies cannot be composed; \
                        resolve them before concatenating")
            }
            (Bytes(mut a), Bytes(b)) => {
                a.extend_from_slice(&b);
                Bytes(a)
            }
            (Bytes(a), Builder(n, make)) => {
                let len = a.len() as u64 + n;
                Builder(len, Arc::new(move || {
                    let mut chunks = vec![a.clone()];
                    chunks.extend(make());
                    chunks
                }))
            }
            (Builder(n, make), Bytes(b)) => {
                let len = n + b.len() as u64;
                Builder(len, Arc::new(move || {
                    let mut chunks = make();
                    chunks.push(b.clone());
                    chunks
                }))
            }
            (Builder(n1, make1), Builder(n2, make2)) => {
                Builder(n1 + n2, Arc::new(move || {
                    let mut chunks = make1();
                    chunks.extend(make2());
                    chunks
                }))
            }
            // A buffered body combined with a streamed one: convert the
            // buffered side into a one-shot stream and fall through to
            // the stream+stream case.
            (a @ Bytes(_), b) | (a @ Builder(_, _), b) => {
                a.into_one_shot_stream().concat(b)
            }
            (a, b @ Bytes(_)) | (a, b @ Builder(_, _)) => {
                a.concat(b.into_one_shot_stream())
            }
            (Stream(n1, f1), Stream(n2, f2)) => {
                Stream(n1 + n2, Arc::new(ConcatPoppers { first: f1, second: f2 }))
            }
            // Either side of unknown length forces chunked framing.
            (a, b) => {
                let f1 = a.into_popper_factory();
                let f2 = b.into_popper_factory();
                ChunkedStream(Arc::new(ConcatPoppers { first: f1, second: f2 }))
            }
        }
    }

    fn into_one_shot_stream(self) -> RequestBody {
        match self {
            RequestBody::Bytes(bytes) => {
                let len = bytes.len() as u64;
                RequestBody::Stream(len, Arc::new(OneShot { bytes }))
            }
            RequestBody::Builder(n, make) => {
                RequestBody::Stream(n, Arc::new(OneShotChunks { make }))
            }
            other => other,
        }
    }

    fn into_popper_factory(self) -> Arc<dyn PopperFactory> {
        match self.into_one_shot_stream() {
            RequestBody::Stream(_, f) => f,
            RequestBody::ChunkedStream(f) => f,
            _ => unreachable!("into_one_shot_stream always yields Stream/ChunkedStream \
                                for Bytes/Builder/Stream/ChunkedStream"),
        }
    }
}

struct OneShot {
    bytes: Vec<u8>,
}

impl PopperFactory for OneShot {
    fn with_popper(
        &self,
        consumer: &mut dyn FnMut(Popper) -> Result<(), HttpExceptionContent>,
    ) -> Result<(), HttpExceptionContent> {
        let mut remaining = Some(self.bytes.clone());
        let popper: Popper = Box::new(move || Ok(remaining.take().unwrap_or_default()));
        consumer(popper)
    }
}

struct OneShotChunks<F> {
    make: F,
}

impl<F> PopperFactory for OneShotChunks<F>
where
    F: Fn() -> Vec<Vec<u8>> + Send + Sync,
{
    fn with_popper(
        &self,
        consumer: &mut dyn FnMut(Popper) -> Result<(), HttpExceptionContent>,
    ) -> Result<(), HttpExceptionContent> {
        let mut chunks = (self.make)().into_iter();
        let popper: Popper = Box::new(move || Ok(chunks.next().unwrap_or_default()));
        consumer(popper)
    }
}

/// Drains `first` to empty, then `second` — the popper half of the
/// `Stream + Stream -> Stream` and `_ + _ -> ChunkedStream` composition
/// rules.
struct ConcatPoppers {
    first: Arc<dyn PopperFactory>,
    second: Arc<dyn PopperFactory>,
}

impl PopperFactory for ConcatPoppers {
    fn with_popper(
        &self,
        consumer: &mut dyn FnMut(Popper) -> Result<(), HttpExceptionContent>,
    ) -> Result<(), HttpExceptionContent> {
        let first = &self.first;
        let second = &self.second;
        first.with_popper(&mut |mut pop_first| {
            second.with_popper(&mut |mut pop_second| {
                let mut first_done = false;
                let popper: Popper = Box::new(move || {
                    if !first_done {
                        let chunk = pop_first()?;
                        if !chunk.is_empty() {
                            return Ok(chunk);
                        }
                        first_done = true;
                    }
                    pop_second()
                });
                consumer(popper)
            })
        })
    }
}

/// Send `body` over `conn`, having already written the status/request
/// line and any caller headers. Implements the five cases of spec.md
/// §4.3.
pub fn send(
    conn: &Connection,
    body: RequestBody,
    on_error: Option<&OnBodyWriteError>,
) -> Result<(), HttpExceptionContent> {
    let body = body.resolve()?;
    let result = send_resolved(conn, body);
    match result {
        Ok(()) => Ok(()),
        Err(ref content) if is_transport_failure(content) => {
            let swallow = on_error.map(|f| f(content)).unwrap_or(true);
            if swallow {
                Ok(())
            } else {
                result
            }
        }
        Err(_) => result,
    }
}

fn is_transport_failure(content: &HttpExceptionContent) -> bool {
    matches!(content, HttpExceptionContent::InternalException(_) | HttpExceptionContent::ConnectionClosed)
}

fn send_resolved(conn: &Connection, body: RequestBody) -> Result<(), HttpExceptionContent> {
    match body {
        RequestBody::Bytes(bytes) => {
            write_header(conn, &format!("Content-Length: {}\r\n\r\n", bytes.len()))?;
            conn.write(&bytes)
        }
        RequestBody::Builder(n, make) => {
            write_header(conn, &format!("Content-Length: {}\r\n\r\n", n))?;
            for chunk in make() {
                conn.write(&chunk)?;
            }
            Ok(())
        }
        RequestBody::Stream(n, factory) => {
            write_header(conn, &format!("Content-Length: {}\r\n\r\n", n))?;
            let mut written: u64 = 0;
            let result = factory.with_popper(&mut |mut pop| {
                loop {
                    let chunk = pop()?;
                    if chunk.is_empty() {
                        break;
                    }
                    written += chunk.len() as u64;
                    conn.write(&chunk)?;
                }
                Ok(())
            });
            result?;
            if written != n {
                return Err(HttpExceptionContent::WrongRequestBodyStreamSize(n, written));
            }
            Ok(())
        }
        RequestBody::ChunkedStream(factory) => {
            write_header(conn, "Transfer-Encoding: chunked\r\n\r\n")?;
            factory.with_popper(&mut |mut pop| {
                loop {
                    let chunk = pop()?;
                    if chunk.is_empty() {
                        break;
                    }
                    write_chunk(conn, &chunk)?;
                }
                conn.write(b"0\r\n\r\n")
            })
        }
        RequestBody::Deferred(_) => unreachable!("resolved before send_resolved is called"),
    }
}

fn write_header(conn: &Connection, header_and_blank_line: &str) -> Result<(), HttpExceptionContent> {
    conn.write(header_and_blank_line.as_bytes())
}

fn write_chunk(conn: &Connection, chunk: &[u8]) -> Result<(), HttpExceptionContent> {
    conn.write(&chunked::frame(chunk))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let client = client.join().unwrap();
        (Connection::from_tcp(client), server)
    }

    fn drain(server: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn bytes_body_sends_content_length_then_bytes() {
        let (conn, mut server) = pair();
        send(&conn, RequestBody::Bytes(b"hello".to_vec()), None).unwrap();
        conn.close();
        assert_eq!(drain(&mut server), b"Content-Length: 5\r\n\r\nhello");
    }

    #[test]
    fn stream_body_mismatch_raises_wrong_size() {
        let (conn, _server) = pair();
        let factory = OneShot { bytes: b"abc".to_vec() };
        let body = RequestBody::Stream(10, Arc::new(factory));
        let err = send(&conn, body, None).unwrap_err();
        assert!(matches!(err, HttpExceptionContent::WrongRequestBodyStreamSize(10, 3)));
    }

    #[test]
    fn chunked_body_frames_each_popper_output() {
        let (conn, mut server) = pair();
        let factory = OneShotChunks { make: || vec![b"hello".to_vec(), b"world".to_vec()] };
        send(&conn, RequestBody::ChunkedStream(Arc::new(factory)), None).unwrap();
        conn.close();
        let out = drain(&mut server);
        assert_eq!(
            out,
            b"Transfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn concat_bytes_plus_bytes_sends_both_in_order() {
        let a = RequestBody::Bytes(b"foo".to_vec());
        let b = RequestBody::Bytes(b"bar".to_vec());
        let combined = a.concat(b);
        assert_eq!(combined.known_length(), Some(6));

        let (conn, mut server) = pair();
        send(&conn, combined, None).unwrap();
        conn.close();
        assert_eq!(drain(&mut server), b"Content-Length: 6\r\n\r\nfoobar");
    }

    #[test]
    fn concat_with_empty_is_identity() {
        let a = RequestBody::Bytes(b"payload".to_vec());
        let combined = RequestBody::empty().concat(a);
        assert_eq!(combined.known_length(), Some(7));
    }

    #[test]
    #[should_panic(expected = "Deferred bodies cannot be composed")]
    fn concat_with_deferred_panics() {
        let deferred = RequestBody::Deferred(Arc::new(|| Ok(RequestBody::empty())));
        let _ = RequestBody::Bytes(Vec::new()).concat(deferred);
    }
}
