//! Chunked transfer-encoding state machine, the decoding half of C4.
//!
//! Adapted from the teacher's `chunked::State` (originally driven off a
//! `netbuf::Buf` fed by `tokio_io`'s async reads) to pull framing
//! incrementally off a blocking [`Connection`]. The parsing algorithm
//! itself — track bytes pending in the current chunk, read a new
//! `<hex>[;ext]\r\n` header once it reaches zero, stop at the zero chunk —
//! is unchanged; only the I/O underneath it is synchronous now.

use connection::Connection;
use error::HttpExceptionContent;
use linereader::{drop_till_blank_line, read_line};

#[derive(Debug, Clone)]
pub struct State {
    /// Bytes remaining in the chunk currently being read, or 0 if we're
    /// between chunks.
    pending: u64,
    /// Whether the CRLF that follows chunk data still needs consuming
    /// before the next chunk-size line can be read. False only before the
    /// very first chunk header.
    need_crlf: bool,
    done: bool,
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpExceptionContent> {
    let size_token = line.split(|&b| b == b';').next().unwrap_or(line);
    let text = std::str::from_utf8(size_token)
        .map_err(|_| HttpExceptionContent::InvalidChunkHeaders)?
        .trim();
    if text.is_empty() {
        return Err(HttpExceptionContent::InvalidChunkHeaders);
    }
    u64::from_str_radix(text, 16).map_err(|_| HttpExceptionContent::InvalidChunkHeaders)
}

impl State {
    pub fn new() -> State {
        State { pending: 0, need_crlf: false, done: false }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Read the next raw chunk-data fragment. An empty result means the
    /// terminal zero-chunk (and any trailers) has been consumed; every
    /// call after that also returns empty without touching the
    /// connection again.
    pub fn pull(&mut self, conn: &Connection) -> Result<Vec<u8>, HttpExceptionContent> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.pending == 0 {
            if self.need_crlf {
                consume_crlf(conn)?;
                self.need_crlf = false;
            }
            let line = read_line(conn)?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                drop_till_blank_line(conn)?;
                self.done = true;
                return Ok(Vec::new());
            }
            self.pending = size;
        }

        let chunk = conn.read()?;
        if chunk.is_empty() {
            return Err(HttpExceptionContent::InvalidChunkHeaders);
        }
        if chunk.len() as u64 <= self.pending {
            self.pending -= chunk.len() as u64;
            if self.pending == 0 {
                self.need_crlf = true;
            }
            Ok(chunk)
        } else {
            let take = self.pending as usize;
            let (mine, rest) = chunk.split_at(take);
            conn.unread(rest.to_vec())?;
            self.pending = 0;
            self.need_crlf = true;
            Ok(mine.to_vec())
        }
    }
}

fn consume_crlf(conn: &Connection) -> Result<(), HttpExceptionContent> {
    let mut got = Vec::with_capacity(2);
    while got.len() < 2 {
        let chunk = conn.read()?;
        if chunk.is_empty() {
            return Err(HttpExceptionContent::InvalidChunkHeaders);
        }
        let need = 2 - got.len();
        if chunk.len() > need {
            let (mine, rest) = chunk.split_at(need);
            got.extend_from_slice(mine);
            conn.unread(rest.to_vec())?;
        } else {
            got.extend_from_slice(&chunk);
        }
    }
    if got != b"\r\n" {
        return Err(HttpExceptionContent::InvalidChunkHeaders);
    }
    Ok(())
}

/// Frame `chunk` as `<hex-len>\r\n<data>\r\n`, the encoding half used by
/// [`crate::body::send`].
pub fn frame(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
    out.extend_from_slice(chunk);
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
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

    #[test]
    fn decodes_a_single_chunk_stream() {
        let (conn, mut server) = pair();
        server.write_all(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        drop(server);

        let mut state = State::new();
        let mut collected = Vec::new();
        loop {
            let chunk = state.pull(&conn).unwrap();
            if chunk.is_empty() {
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello");
        assert!(state.is_done());
        assert_eq!(state.pull(&conn).unwrap(), Vec::new());
    }

    #[test]
    fn roundtrips_arbitrary_bytes_through_frame_and_decode() {
        let payload: Vec<u8> = (0u32..5000).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        for piece in payload.chunks(731) {
            wire.extend_from_slice(&frame(piece));
        }
        wire.extend_from_slice(&frame(&[]));

        let (conn, mut server) = pair();
        server.write_all(&wire).unwrap();
        drop(server);

        let mut state = State::new();
        let mut collected = Vec::new();
        loop {
            let chunk = state.pull(&conn).unwrap();
            if chunk.is_empty() {
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, payload);
    }

    #[test]
    fn malformed_chunk_size_is_rejected() {
        let (conn, mut server) = pair();
        server.write_all(b"not-hex\r\nhello\r\n").unwrap();
        drop(server);
        let mut state = State::new();
        let err = state.pull(&conn).unwrap_err();
        assert!(matches!(err, HttpExceptionContent::InvalidChunkHeaders));
    }
}
