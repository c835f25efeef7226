//! The Manager (C6): composes the pool, dialers, and proxy logic behind
//! the single request-execution entry point `perform`.
//!
//! Grounded in the teacher's `client/config.rs` (`Config::new()` + fluent
//! setters + `.done()`) for [`ManagerSettings`], and in the overall shape
//! of `client/client.rs`'s per-request state machine for the steps
//! `perform` walks through — reimplemented over blocking I/O per spec.md
//! §5 instead of driving a `futures::Future`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use body;
use connection::Connection;
use cookie::CookieJar;
use dialer::{self, DefaultRawDialer, DefaultTlsDialer, RawDialer, TlsDialer};
use error::{HttpException, HttpExceptionContent};
use linereader::{drop_till_blank_line, read_line};
use pool::{ConnKey, Pool};
use request::{ProxySecureMode, Request};
use response::{Response, ResponseClose};
use response_body::{self, BodyReader, ContentEncoding};
use status::StatusCode;
use version::Version;

/// A callback applied to every outgoing request before it is dispatched.
/// Must be idempotent: the manager may invoke it more than once for the
/// same logical request (initial attempt, then again on transparent
/// retry).
pub type ModifyRequest = Arc<dyn Fn(Request) -> Request + Send + Sync>;

/// A callback applied to a fully-received response before it is handed
/// back to the caller.
pub type ModifyResponse = Arc<dyn Fn(Response<BodyReader>) -> Response<BodyReader> + Send + Sync>;

/// Resolves the proxy (if any) a request should be routed through,
/// depending on whether it is secure.
pub type ProxyResolver = Arc<dyn Fn(&Request) -> Option<::request::Proxy> + Send + Sync>;

/// Decides whether a failure on a *reused* connection should be retried
/// once on a fresh connection.
pub type RetryableException = Arc<dyn Fn(&HttpExceptionContent) -> bool + Send + Sync>;

/// Builder for [`Manager`]'s tunables, mirroring the teacher's
/// `Config::new() -> ... -> .done()` pattern but returning a plain owned
/// struct rather than an `Arc`, since `Manager` itself is the shared
/// handle callers clone around.
pub struct ManagerSettings {
    per_host_idle_cap: usize,
    global_idle_cap: usize,
    idle_ttl: Duration,
    response_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    retryable_exception: RetryableException,
    manager_modify_request: Option<ModifyRequest>,
    manager_modify_response: Option<ModifyResponse>,
    manager_proxy_insecure: Option<ProxyResolver>,
    manager_proxy_secure: Option<ProxyResolver>,
}

fn default_retryable(content: &HttpExceptionContent) -> bool {
    ::error::is_retry_eligible(content, true)
}

impl ManagerSettings {
    pub fn new() -> ManagerSettings {
        ManagerSettings {
            per_host_idle_cap: 10,
            global_idle_cap: 512,
            idle_ttl: Duration::from_secs(90),
            response_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            retryable_exception: Arc::new(default_retryable),
            manager_modify_request: None,
            manager_modify_response: None,
            manager_proxy_insecure: None,
            manager_proxy_secure: None,
        }
    }

    pub fn per_host_idle_cap(mut self, n: usize) -> Self {
        self.per_host_idle_cap = n;
        self
    }

    pub fn global_idle_cap(mut self, n: usize) -> Self {
        self.global_idle_cap = n;
        self
    }

    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn retryable_exception(mut self, f: RetryableException) -> Self {
        self.retryable_exception = f;
        self
    }

    pub fn manager_modify_request(mut self, f: ModifyRequest) -> Self {
        self.manager_modify_request = Some(f);
        self
    }

    pub fn manager_modify_response(mut self, f: ModifyResponse) -> Self {
        self.manager_modify_response = Some(f);
        self
    }

    pub fn manager_proxy_insecure(mut self, f: ProxyResolver) -> Self {
        self.manager_proxy_insecure = Some(f);
        self
    }

    pub fn manager_proxy_secure(mut self, f: ProxyResolver) -> Self {
        self.manager_proxy_secure = Some(f);
        self
    }

    /// Finalise the settings into a ready-to-use [`Manager`] with the
    /// default dialers.
    pub fn done(self) -> Result<Manager, HttpExceptionContent> {
        let tls_dialer: Option<Arc<dyn TlsDialer>> =
            Some(Arc::new(DefaultTlsDialer::new(self.connect_timeout)?));
        Ok(Manager {
            pool: Pool::new(self.global_idle_cap, self.per_host_idle_cap, self.idle_ttl),
            raw_dialer: Arc::new(DefaultRawDialer { connect_timeout: self.connect_timeout }),
            tls_dialer,
            settings: self,
        })
    }
}

impl Default for ManagerSettings {
    fn default() -> ManagerSettings {
        ManagerSettings::new()
    }
}

/// Composition of pool + dialers + proxy/modifier hooks; the crate's
/// single request-execution entry point is [`Manager::perform`].
pub struct Manager {
    pool: Arc<Pool>,
    raw_dialer: Arc<dyn RawDialer>,
    tls_dialer: Option<Arc<dyn TlsDialer>>,
    settings: ManagerSettings,
}

impl Manager {
    pub fn new() -> Result<Manager, HttpExceptionContent> {
        ManagerSettings::new().done()
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn conn_key(&self, req: &Request) -> ConnKey {
        match (req.secure, &req.proxy) {
            (false, None) => ConnKey::Raw {
                host_addr: req.host_address_override,
                host: req.host.clone(),
                port: req.port,
            },
            (true, None) => ConnKey::Secure {
                host_addr: req.host_address_override,
                host: req.host.clone(),
                port: req.port,
            },
            (_, Some(proxy)) => ConnKey::Proxy {
                proxy_host: proxy.host.clone(),
                proxy_port: proxy.port,
                proxy_auth: proxy.auth.clone(),
                host: req.host.clone(),
                port: req.port,
            },
        }
    }

    fn apply_request_modifiers(&self, mut req: Request) -> Request {
        if let Some(ref modify) = self.settings.manager_modify_request {
            req = modify(req);
        }
        req
    }

    fn resolve_proxy(&self, req: &mut Request) {
        if req.proxy.is_some() {
            return;
        }
        let resolver = if req.secure {
            self.settings.manager_proxy_secure.as_ref()
        } else {
            self.settings.manager_proxy_insecure.as_ref()
        };
        if let Some(resolver) = resolver {
            req.proxy = resolver(req);
        }
    }

    /// The single entry point (spec.md §4.6): execute `req`, following
    /// the nine steps in order, with a single transparent retry on a
    /// fresh connection if the failure happened on a reused one and
    /// `retryableException` approves.
    pub fn perform(&self, req: &Request) -> Result<Response<BodyReader>, HttpException> {
        let mut req = self.apply_request_modifiers(req.clone());
        self.resolve_proxy(&mut req);

        if req.host.is_empty() {
            return Err(HttpException::request(&req, HttpExceptionContent::InvalidDestinationHost(req.host.clone())));
        }

        match self.perform_once(&req) {
            Ok(response) => Ok(response),
            Err((content, reused)) if reused && (self.settings.retryable_exception)(&content) => {
                warn!("retrying request to {}:{} after {:?} on a reused connection", req.host, req.port, content);
                self.perform_once(&req).map_err(|(content, _)| HttpException::request(&req, content))
            }
            Err((content, _)) => Err(HttpException::request(&req, content)),
        }
    }

    fn perform_once(&self, req: &Request) -> Result<Response<BodyReader>, (HttpExceptionContent, bool)> {
        let key = self.conn_key(req);
        req.trace.fire_get_connection();

        let (conn, reused, idle_time) = self.checkout_or_dial(req, &key)
            .map_err(|e| (e, false))?;
        req.trace.fire_got_connection(reused, idle_time);

        let result = self.run_on_connection(req, &key, conn.clone());
        result.map_err(|content| (content, reused))
    }

    /// Resolve `host` to an address, bracketing an actual lookup with
    /// `dns-start`/`dns-done` trace hooks. A pre-resolved `host_addr`
    /// (from `Request::host_address_override`) short-circuits the lookup
    /// and fires neither hook, since no DNS resolution took place.
    fn resolve_with_trace(
        &self,
        req: &Request,
        host_addr: Option<std::net::IpAddr>,
        host: &str,
        port: u16,
    ) -> Result<std::net::IpAddr, HttpExceptionContent> {
        if let Some(ip) = host_addr {
            return Ok(ip);
        }
        req.trace.fire_dns_start(host);
        let addr = dialer::resolve(None, host, port)
            .map_err(HttpExceptionContent::ConnectionFailure)?;
        req.trace.fire_dns_done();
        Ok(addr.ip())
    }

    fn checkout_or_dial(
        &self,
        req: &Request,
        key: &ConnKey,
    ) -> Result<(Connection, bool, Option<Duration>), HttpExceptionContent> {
        if let Some(checkout) = self.pool.checkout(key) {
            return Ok((checkout.conn, checkout.reused, checkout.idle_time));
        }

        let conn = match *key {
            ConnKey::Raw { host_addr, ref host, port } => {
                let resolved = self.resolve_with_trace(req, host_addr, host, port)?;
                req.trace.fire_connect_start(host);
                let conn = self.raw_dialer.dial(Some(resolved), host, port)?;
                req.trace.fire_connect_done();
                conn
            }
            ConnKey::Secure { host_addr, ref host, port } => {
                let tls = self.tls_dialer.as_ref().ok_or(HttpExceptionContent::TlsNotSupported)?;
                let resolved = self.resolve_with_trace(req, host_addr, host, port)?;
                req.trace.fire_connect_start(host);
                req.trace.fire_tls_handshake_start();
                let conn = tls.dial(Some(resolved), host, port)?;
                req.trace.fire_tls_handshake_done();
                req.trace.fire_connect_done();
                conn
            }
            ConnKey::Proxy { ref proxy_host, proxy_port, ref proxy_auth, ref host, port } => {
                let resolved = self.resolve_with_trace(req, None, proxy_host, proxy_port)?;
                req.trace.fire_connect_start(proxy_host);
                let raw = self.raw_dialer.dial(Some(resolved), proxy_host, proxy_port)?;
                req.trace.fire_connect_done();
                self.connect_tunnel(&raw, host, port, proxy_auth.as_deref())?;
                match req.proxy_secure_mode {
                    ProxySecureMode::Connect => {
                        let tls = self.tls_dialer.as_ref().ok_or(HttpExceptionContent::TlsNotSupported)?;
                        req.trace.fire_tls_handshake_start();
                        let stream = raw.into_raw_tcp_stream()?;
                        let upgraded = tls.upgrade(stream, host)?;
                        req.trace.fire_tls_handshake_done();
                        upgraded
                    }
                    ProxySecureMode::Direct => raw,
                }
            }
        };
        Ok((conn, false, None))
    }

    /// Manager step 4: `CONNECT host:port HTTP/1.1` through a proxy.
    /// Non-2xx fails with `ProxyConnectException` and the connection is
    /// dropped without attempting a TLS handshake.
    fn connect_tunnel(
        &self,
        conn: &Connection,
        host: &str,
        port: u16,
        proxy_auth: Option<&[u8]>,
    ) -> Result<(), HttpExceptionContent> {
        let mut preface = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n", host = host, port = port);
        if let Some(auth) = proxy_auth {
            preface.push_str("Proxy-Authorization: ");
            preface.push_str(&String::from_utf8_lossy(auth));
            preface.push_str("\r\n");
        }
        preface.push_str("\r\n");
        conn.write(preface.as_bytes())?;

        let status_line = read_line(conn)?;
        let status = parse_status_line(&status_line)?;
        if !status.0.is_success() {
            conn.close();
            return Err(HttpExceptionContent::ProxyConnectException(host.to_string(), port, status.0.0));
        }
        drop_till_blank_line(conn)?;
        Ok(())
    }

    fn run_on_connection(
        &self,
        req: &Request,
        key: &ConnKey,
        conn: Connection,
    ) -> Result<Response<BodyReader>, HttpExceptionContent> {
        let response_timeout = req.response_timeout.or(self.settings.response_timeout);
        let deadline = response_timeout.map(|d| Instant::now() + d);
        conn.set_read_timeout(response_timeout)
            .map_err(HttpExceptionContent::InternalException)?;

        write_request(&conn, req)?;
        req.trace.fire_wrote_request();

        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(HttpExceptionContent::ResponseTimeout);
            }
        }

        let (status, reason, version, headers) = read_response_head(&conn, req)?;
        req.trace.fire_got_first_response_byte();
        conn.set_read_timeout(None)
            .map_err(HttpExceptionContent::InternalException)?;

        let body_kind = response_body::classify(
            req.method == ::request::Method::Head,
            status.0,
            headers.iter().map(|(n, v)| (n.as_str(), v.as_slice())),
        )?;
        let should_close = headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("Connection") && ::headers::is_close(value)
        });

        let encoding = if req.raw_body {
            None
        } else {
            headers.iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("Content-Encoding"))
                .and_then(|(_, value)| ContentEncoding::from_header(value))
                .filter(|_| {
                    let mime = headers.iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Type"))
                        .map(|(_, v)| String::from_utf8_lossy(v).to_string())
                        .unwrap_or_default();
                    (req.decompress)(&mime)
                })
        };

        let close = ResponseClose::new(self.pool.clone(), key.clone(), conn.clone(), should_close);
        let trace_on_put_idle = req.trace.clone();
        close.set_on_put_idle(Arc::new(move || trace_on_put_idle.fire_put_idle_connection()));
        let mut body_reader = BodyReader::new(conn, body_kind, encoding);
        let close_on_drain = close.clone();
        body_reader.set_on_drained(Arc::new(move || close_on_drain.release()));

        let response = Response {
            status,
            reason,
            version,
            response_headers: headers,
            body: body_reader,
            cookie_jar: req.cookie_jar.clone().unwrap_or_else(CookieJar::new),
            close,
            request: req.without_body(),
        };

        let response = if let Some(ref modify) = self.settings.manager_modify_response {
            modify(response)
        } else {
            response
        };

        if let Some(ref check) = req.check_response {
            check(&response.head())?;
        }

        Ok(response)
    }
}

fn write_request(conn: &Connection, req: &Request) -> Result<(), HttpExceptionContent> {
    let target = if req.query_string.is_empty() {
        req.path.clone()
    } else {
        format!("{}?{}", req.path, req.query_string)
    };
    let request_line = format!("{} {} {}\r\n", req.method, target, req.request_version);
    conn.write(request_line.as_bytes())?;

    let mut wrote_host = false;
    let mut wrote_accept_encoding = false;
    for (name, value) in &req.request_headers {
        if ::headers::contains_crlf(name.as_bytes()) || ::headers::contains_crlf(value) {
            return Err(HttpExceptionContent::InvalidRequestHeader(name.clone()));
        }
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Transfer-Encoding") {
            // The body variant determines framing; user-supplied values
            // for these are never honoured.
            continue;
        }
        if name.eq_ignore_ascii_case("Host") {
            wrote_host = true;
        }
        if name.eq_ignore_ascii_case("Accept-Encoding") {
            wrote_accept_encoding = true;
            if value.is_empty() {
                // Explicit suppression: omit the header entirely.
                continue;
            }
        }
        write_header_line(conn, req, name, value)?;
    }
    if !wrote_host {
        write_header_line(conn, req, "Host", req.default_host_header().as_bytes())?;
    }
    if !wrote_accept_encoding {
        write_header_line(conn, req, "Accept-Encoding", b"gzip")?;
    }
    req.trace.fire_wrote_headers();

    body::send(conn, req.request_body.clone(), req.on_request_body_exception.as_ref())
}

fn write_header_line(conn: &Connection, req: &Request, name: &str, value: &[u8]) -> Result<(), HttpExceptionContent> {
    req.trace.fire_wrote_header_field(name, value);
    let mut line = Vec::with_capacity(name.len() + value.len() + 4);
    line.extend_from_slice(name.as_bytes());
    line.extend_from_slice(b": ");
    line.extend_from_slice(value);
    line.extend_from_slice(b"\r\n");
    conn.write(&line)
}

fn parse_status_line(line: &[u8]) -> Result<(StatusCode, Version), HttpExceptionContent> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HttpExceptionContent::InvalidStatusLine(String::from_utf8_lossy(line).to_string()))?;
    let mut parts = text.splitn(3, ' ');
    let version_token = parts.next().unwrap_or("");
    let code_token = parts.next().unwrap_or("");
    let version = Version::parse(version_token)
        .ok_or_else(|| HttpExceptionContent::InvalidStatusLine(text.to_string()))?;
    let code: u16 = code_token.parse()
        .map_err(|_| HttpExceptionContent::InvalidStatusLine(text.to_string()))?;
    Ok((StatusCode(code), version))
}

/// Reads the status line and headers, transparently consuming any number
/// of leading 1xx informational responses (spec.md §4.6 step 6 / §9:
/// `got100Continue` fires only for exact code 100, `got1xxResponse` fires
/// for every 1xx including 100 — both fire for a 100 response).
fn read_response_head(
    conn: &Connection,
    req: &Request,
) -> Result<(StatusCode, String, Version, Vec<(String, Vec<u8>)>), HttpExceptionContent> {
    loop {
        let status_line = read_line(conn)?;
        if status_line.is_empty() {
            return Err(HttpExceptionContent::NoResponseDataReceived);
        }
        let text = std::str::from_utf8(&status_line)
            .map_err(|_| HttpExceptionContent::InvalidStatusLine(String::from_utf8_lossy(&status_line).to_string()))?;
        let mut parts = text.splitn(3, ' ');
        let version_token = parts.next().unwrap_or("");
        let code_token = parts.next().unwrap_or("");
        let reason = parts.next().unwrap_or("").to_string();
        let version = Version::parse(version_token)
            .ok_or_else(|| HttpExceptionContent::InvalidStatusLine(text.to_string()))?;
        let code: u16 = code_token.parse()
            .map_err(|_| HttpExceptionContent::InvalidStatusLine(text.to_string()))?;
        let status = StatusCode(code);

        let mut headers = Vec::new();
        loop {
            let line = read_line(conn)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = split_header_line(&line)?;
            headers.push((name, value));
        }

        if status.is_informational() {
            req.trace.fire_got_1xx_response(code, &headers)?;
            if status.is_continue() {
                req.trace.fire_got_100_continue();
            }
            continue;
        }

        return Ok((status, reason, version, headers));
    }
}

fn split_header_line(line: &[u8]) -> Result<(String, Vec<u8>), HttpExceptionContent> {
    let colon = line.iter().position(|&b| b == b':')
        .ok_or_else(|| HttpExceptionContent::InvalidHeader(String::from_utf8_lossy(line).to_string()))?;
    let name = std::str::from_utf8(&line[..colon])
        .map_err(|_| HttpExceptionContent::InvalidHeader(String::from_utf8_lossy(line).to_string()))?
        .to_string();
    let mut value = &line[colon + 1..];
    while value.first() == Some(&b' ') || value.first() == Some(&b'\t') {
        value = &value[1..];
    }
    Ok((name, value.to_vec()))
}

#[cfg(test)]
mod test {
    use super::*;
    use request::Method;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn respond(script: &'static [u8]) -> (Manager, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(script);
            }
        });
        let manager = ManagerSettings::new().done().unwrap();
        (manager, port)
    }

    use std::io::Read;

    #[test]
    fn s1_chunked_get_via_manager() {
        let (manager, port) = respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();
        let mut response = manager.perform(&req).unwrap();
        assert_eq!(response.status.0, 200);
        assert_eq!(response.body.next_chunk().unwrap(), b"hello");
        assert_eq!(response.body.next_chunk().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn s2_content_length_truncation_via_manager() {
        let (manager, port) = respond(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhi");
        let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();
        let mut response = manager.perform(&req).unwrap();
        assert_eq!(response.body.next_chunk().unwrap(), b"hi");
        let err = response.body.next_chunk().unwrap_err();
        assert!(matches!(err, HttpExceptionContent::ResponseBodyTooShort(10, 2)));
    }

    #[test]
    fn s3_overlong_header_is_rejected() {
        let mut script = b"HTTP/1.1 200 OK\r\nX-Big: ".to_vec();
        script.extend(std::iter::repeat(b'A').take(4100));
        script.extend_from_slice(b"\r\n\r\n");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(&script);
            }
        });
        let manager = ManagerSettings::new().done().unwrap();
        let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();
        let err = manager.perform(&req).unwrap_err();
        assert!(matches!(err.content(), Some(HttpExceptionContent::OverlongHeaders)));
    }

    #[test]
    fn s5_100_continue_then_200() {
        let (manager, port) = respond(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        );
        let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();
        let response = manager.perform(&req).unwrap();
        assert_eq!(response.status.0, 200);
    }
}
