//! Core of an HTTP/1.x client: connections, a keyed connection pool,
//! streaming request/response bodies, and a blocking request-execution
//! manager.

#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
extern crate native_tls;
extern crate flate2;

pub mod connection;
pub mod linereader;
pub mod popper;
pub mod body;
mod chunked;
pub mod response_body;
pub mod pool;
pub mod dialer;
pub mod manager;
pub mod request;
pub mod response;
pub mod error;
pub mod trace;
pub mod cookie;
pub mod version;
pub mod status;
mod headers;

pub use body::RequestBody;
pub use connection::Connection;
pub use cookie::{Cookie, CookieJar};
pub use dialer::{DefaultRawDialer, DefaultTlsDialer, RawDialer, TlsDialer};
pub use error::{HttpException, HttpExceptionContent};
pub use manager::{Manager, ManagerSettings};
pub use pool::ConnKey;
pub use request::{Method, Proxy, ProxySecureMode, Request, RequestBuilder};
pub use response::{Response, ResponseClose, ResponseHead};
pub use response_body::{BodyReader, ContentEncoding};
pub use status::StatusCode;
pub use trace::RequestTrace;
pub use version::Version;
