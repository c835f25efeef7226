//! The immutable request descriptor (C7) and the small enums it is built
//! from.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use body::{OnBodyWriteError, RequestBody};
use cookie::CookieJar;
use error::HttpExceptionContent;
use manager::Manager;
use response::ResponseHead;
use trace::RequestTrace;
use version::Version;

/// HTTP request method.
///
/// Mirrors the common methods explicitly and falls back to `Other` for
/// anything else, so a caller can still issue e.g. `PROPFIND` without the
/// crate standing in the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        use self::Method::*;
        match *self {
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Patch => "PATCH",
            Delete => "DELETE",
            Options => "OPTIONS",
            Trace => "TRACE",
            Connect => "CONNECT",
            Other(ref s) => s,
        }
    }
}

impl<'a> From<&'a str> for Method {
    fn from(s: &'a str) -> Method {
        match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy endpoint a request should be routed through.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    /// Pre-encoded `Proxy-Authorization` value, if any.
    pub auth: Option<Vec<u8>>,
}

/// How a secure request should traverse its proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySecureMode {
    /// Issue `CONNECT host:port` and upgrade the tunnel to TLS.
    Connect,
    /// Speak HTTPS directly to the proxy (the proxy terminates TLS itself).
    Direct,
}

/// Ordered, duplicate-tolerant header list. Names are matched
/// case-insensitively by every method on [`Request`] but are stored as
/// supplied.
pub type HeaderList = Vec<(String, Vec<u8>)>;

/// A callback run against the mime type of a response to decide whether to
/// transparently decompress it.
pub type DecompressPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A callback run against a fully-headered response before it is handed back
/// to the caller; returning `Err` aborts the request with that error.
pub type CheckResponse =
    Arc<dyn Fn(&ResponseHead) -> Result<(), HttpExceptionContent> + Send + Sync>;

/// A callback invoked when writing the request body fails; it decides
/// whether the failure should be swallowed (the server may have already
/// responded) or rethrown. Shares its shape with [`crate::body::OnBodyWriteError`],
/// which is what actually drives the decision inside [`crate::body::send`].
pub type OnRequestBodyException = OnBodyWriteError;

/// Decide whether a header should be dropped when following a redirect
/// (e.g. stripping `Authorization` on cross-host redirects).
pub type StripHeaderOnRedirect = Arc<dyn Fn(&str) -> bool + Send + Sync>;

fn default_decompress(mime: &str) -> bool {
    mime.eq_ignore_ascii_case("gzip") || mime.eq_ignore_ascii_case("deflate")
        || mime.eq_ignore_ascii_case("x-gzip")
}

fn default_strip_header_on_redirect(_name: &str) -> bool {
    false
}

/// Immutable request descriptor (C7).
///
/// Constructed once via [`RequestBuilder`] and then shared read-only across
/// retries/redirects; the body is the only field that may need rebuilding
/// per the rules in [`crate::body`].
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query_string: String,
    pub request_headers: HeaderList,
    pub request_body: RequestBody,
    pub proxy: Option<Proxy>,
    pub host_address_override: Option<std::net::IpAddr>,
    pub raw_body: bool,
    pub decompress: DecompressPredicate,
    pub redirect_count: u32,
    pub check_response: Option<CheckResponse>,
    pub response_timeout: Option<Duration>,
    pub cookie_jar: Option<CookieJar>,
    pub request_version: Version,
    pub on_request_body_exception: Option<OnRequestBodyException>,
    pub manager_override: Option<Arc<Manager>>,
    pub should_strip_header_on_redirect: StripHeaderOnRedirect,
    pub proxy_secure_mode: ProxySecureMode,
    pub trace: RequestTrace,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("secure", &self.secure)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("query_string", &self.query_string)
            .field("request_headers", &self.request_headers)
            .field("redirect_count", &self.redirect_count)
            .field("request_version", &self.request_version)
            .finish()
    }
}

impl Request {
    /// Start building a request for `method host:port path`.
    pub fn builder(method: Method, host: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, host, path)
    }

    /// The value the `Host` header should carry if the user did not
    /// supply one explicitly.
    pub fn default_host_header(&self) -> String {
        match (self.secure, self.port) {
            (true, 443) | (false, 80) => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// A snapshot of this request with the body replaced by an empty one,
    /// suitable for embedding in a [`crate::response::Response`].
    pub fn without_body(&self) -> Request {
        let mut copy = self.clone();
        copy.request_body = RequestBody::Bytes(Vec::new());
        copy
    }
}

/// Builder for [`Request`], defaulting every optional field the way the
/// core expects (no decompression override, no proxy, HTTP/1.1, etc).
pub struct RequestBuilder {
    req: Request,
}

impl RequestBuilder {
    pub fn new(method: Method, host: impl Into<String>, path: impl Into<String>) -> Self {
        RequestBuilder {
            req: Request {
                method,
                secure: false,
                host: host.into(),
                port: 80,
                path: path.into(),
                query_string: String::new(),
                request_headers: Vec::new(),
                request_body: RequestBody::Bytes(Vec::new()),
                proxy: None,
                host_address_override: None,
                raw_body: false,
                decompress: Arc::new(default_decompress),
                redirect_count: 10,
                check_response: None,
                response_timeout: Some(Duration::from_secs(30)),
                cookie_jar: None,
                request_version: Version::Http11,
                on_request_body_exception: None,
                manager_override: None,
                should_strip_header_on_redirect: Arc::new(default_strip_header_on_redirect),
                proxy_secure_mode: ProxySecureMode::Connect,
                trace: RequestTrace::default(),
            },
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.req.secure = secure;
        if self.req.port == 80 && secure {
            self.req.port = 443;
        }
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.req.port = port;
        self
    }

    pub fn query_string(mut self, qs: impl Into<String>) -> Self {
        self.req.query_string = qs.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.req.request_headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.req.request_body = body;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.req.proxy = Some(proxy);
        self
    }

    pub fn raw_body(mut self, raw: bool) -> Self {
        self.req.raw_body = raw;
        self
    }

    pub fn redirect_count(mut self, n: u32) -> Self {
        self.req.redirect_count = n;
        self
    }

    pub fn response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.req.response_timeout = timeout;
        self
    }

    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.req.cookie_jar = Some(jar);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.req.request_version = version;
        self
    }

    pub fn manager(mut self, manager: Arc<Manager>) -> Self {
        self.req.manager_override = Some(manager);
        self
    }

    pub fn trace(mut self, trace: RequestTrace) -> Self {
        self.req.trace = trace;
        self
    }

    pub fn build(self) -> Request {
        self.req
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_from_str() {
        assert_eq!(Method::from("GET"), Method::Get);
        assert_eq!(Method::from("get"), Method::Other("get".to_string()));
        assert_eq!(Method::from("PROPFIND"), Method::Other("PROPFIND".to_string()));
    }

    #[test]
    fn default_host_header_omits_default_port() {
        let req = Request::builder(Method::Get, "example.com", "/").build();
        assert_eq!(req.default_host_header(), "example.com");

        let req = Request::builder(Method::Get, "example.com", "/").port(8080).build();
        assert_eq!(req.default_host_header(), "example.com:8080");

        let req = Request::builder(Method::Get, "example.com", "/").secure(true).build();
        assert_eq!(req.default_host_header(), "example.com");
    }
}
