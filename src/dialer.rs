//! Dialer contracts (§6): how the manager turns a `ConnKey` into a fresh
//! [`Connection`] when none is idle in the pool.
//!
//! Grounded in the teacher's `tls_client.rs`/`native_tls_client.rs`
//! examples (the only place the teacher ever drives `native-tls` — as a
//! demo, not a library feature) for the handshake shape, generalized
//! behind traits so a caller can substitute a mock dialer in tests, the
//! same role `abstract_ns`'s `Resolver` trait plays for the teacher's own
//! DNS layer.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsConnector;

use connection::Connection;
use error::HttpExceptionContent;

/// Resolve `host` to an address, or short-circuit to `host_addr` if the
/// caller pre-resolved it. Exposed so the manager can bracket the actual
/// DNS lookup with `dns-start`/`dns-done` trace hooks before handing a
/// resolved `IpAddr` down to a dialer (which then skips its own lookup).
pub(crate) fn resolve(host_addr: Option<IpAddr>, host: &str, port: u16) -> io::Result<SocketAddr> {
    if let Some(ip) = host_addr {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))
}

fn dial_tcp(
    host_addr: Option<IpAddr>,
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream, HttpExceptionContent> {
    let addr = resolve(host_addr, host, port).map_err(HttpExceptionContent::ConnectionFailure)?;
    let stream = match timeout {
        Some(d) => TcpStream::connect_timeout(&addr, d),
        None => TcpStream::connect(addr),
    }
    .map_err(HttpExceptionContent::ConnectionFailure)?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Opens a plain TCP connection for `ConnKey::Raw`.
pub trait RawDialer: Send + Sync {
    fn dial(&self, host_addr: Option<IpAddr>, host: &str, port: u16) -> Result<Connection, HttpExceptionContent>;
}

/// Opens a TLS connection for `ConnKey::Secure`.
pub trait TlsDialer: Send + Sync {
    fn dial(&self, host_addr: Option<IpAddr>, host: &str, port: u16) -> Result<Connection, HttpExceptionContent>;

    /// Upgrade an already-established raw stream (the far end of a
    /// successful `CONNECT` tunnel) to TLS, validating the certificate
    /// against `host`.
    fn upgrade(&self, stream: TcpStream, host: &str) -> Result<Connection, HttpExceptionContent>;
}

/// Default TCP dialer: blocking `connect`, optionally bounded by a dial
/// timeout (`ConnectionTimeout` on expiry).
pub struct DefaultRawDialer {
    pub connect_timeout: Option<Duration>,
}

impl RawDialer for DefaultRawDialer {
    fn dial(&self, host_addr: Option<IpAddr>, host: &str, port: u16) -> Result<Connection, HttpExceptionContent> {
        if host.is_empty() {
            return Err(HttpExceptionContent::InvalidDestinationHost(host.to_string()));
        }
        debug!("dialing raw connection to {}:{}", host, port);
        let stream = dial_tcp(host_addr, host, port, self.connect_timeout)?;
        Ok(Connection::from_tcp(stream))
    }
}

/// Default TLS dialer backed by `native-tls`, the crate the teacher's own
/// `native_tls_client.rs` example reaches for.
pub struct DefaultTlsDialer {
    pub connect_timeout: Option<Duration>,
    pub connector: TlsConnector,
}

impl DefaultTlsDialer {
    pub fn new(connect_timeout: Option<Duration>) -> Result<DefaultTlsDialer, HttpExceptionContent> {
        let connector = TlsConnector::new()
            .map_err(|e| HttpExceptionContent::ConnectionFailure(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(DefaultTlsDialer { connect_timeout, connector })
    }
}

impl TlsDialer for DefaultTlsDialer {
    fn dial(&self, host_addr: Option<IpAddr>, host: &str, port: u16) -> Result<Connection, HttpExceptionContent> {
        if host.is_empty() {
            return Err(HttpExceptionContent::InvalidDestinationHost(host.to_string()));
        }
        debug!("dialing TLS connection to {}:{}", host, port);
        let stream = dial_tcp(host_addr, host, port, self.connect_timeout)?;
        self.upgrade(stream, host)
    }

    fn upgrade(&self, stream: TcpStream, host: &str) -> Result<Connection, HttpExceptionContent> {
        let tls = self.connector.connect(host, stream)
            .map_err(|e| HttpExceptionContent::ConnectionFailure(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(Connection::from_tls(tls))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_host_is_rejected_before_dialing() {
        let dialer = DefaultRawDialer { connect_timeout: None };
        let err = dialer.dial(None, "", 80).unwrap_err();
        assert!(matches!(err, HttpExceptionContent::InvalidDestinationHost(_)));
    }
}
