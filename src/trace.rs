//! `RequestTrace` — the fixed-shape per-phase observer bundle (§3/§9).
//!
//! Grounded in the teacher's `Codec` trait shape (`client/client.rs`): a
//! fixed set of methods with one call site each on the hot path. Here we
//! use a record of boxed closures with no-op defaults rather than a trait
//! with many default methods, since callers construct one `RequestTrace`
//! per request (sometimes none at all) rather than implementing a type;
//! either shape satisfies spec.md §9's guidance. No-op observers are
//! plain function pointers so the common (untraced) path never allocates
//! or dynamically dispatches through `Option<Box<dyn Fn>>`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use error::HttpExceptionContent;

type Hook0 = Arc<dyn Fn() + Send + Sync>;
type HookConn = Arc<dyn Fn(bool, Option<Duration>) + Send + Sync>;
type HookStatus = Arc<dyn Fn(u16, &[(String, Vec<u8>)]) -> Result<(), HttpExceptionContent> + Send + Sync>;
type HookStr = Arc<dyn Fn(&str) + Send + Sync>;
type HookHeader = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A bundle of per-phase observation callbacks.
///
/// Exceptions a callback raises are swallowed by the manager, except
/// `got_1xx_response`'s return value, which may voluntarily abort the
/// request (return `Err` to do so). Callbacks never mutate request
/// semantics and are delivered in the order listed in spec.md §3, never
/// interleaved with each other for the same request.
#[derive(Clone)]
pub struct RequestTrace {
    pub get_connection: Option<Hook0>,
    pub got_connection: Option<HookConn>,
    pub put_idle_connection: Option<Hook0>,
    pub got_first_response_byte: Option<Hook0>,
    pub got_100_continue: Option<Hook0>,
    pub got_1xx_response: Option<HookStatus>,
    pub dns_start: Option<HookStr>,
    pub dns_done: Option<Hook0>,
    pub connect_start: Option<HookStr>,
    pub connect_done: Option<Hook0>,
    pub tls_handshake_start: Option<Hook0>,
    pub tls_handshake_done: Option<Hook0>,
    pub wrote_header_field: Option<HookHeader>,
    pub wrote_headers: Option<Hook0>,
    pub wait_100_continue: Option<Hook0>,
    pub wrote_request: Option<Hook0>,
}

impl Default for RequestTrace {
    fn default() -> RequestTrace {
        RequestTrace {
            get_connection: None,
            got_connection: None,
            put_idle_connection: None,
            got_first_response_byte: None,
            got_100_continue: None,
            got_1xx_response: None,
            dns_start: None,
            dns_done: None,
            connect_start: None,
            connect_done: None,
            tls_handshake_start: None,
            tls_handshake_done: None,
            wrote_header_field: None,
            wrote_headers: None,
            wait_100_continue: None,
            wrote_request: None,
        }
    }
}

impl fmt::Debug for RequestTrace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestTrace").finish_non_exhaustive()
    }
}

macro_rules! fire0 {
    ($self:expr, $field:ident) => {
        if let Some(ref hook) = $self.$field {
            hook();
        }
    };
}

impl RequestTrace {
    pub fn fire_get_connection(&self) {
        fire0!(self, get_connection);
    }
    pub fn fire_got_connection(&self, reused: bool, idle_time: Option<Duration>) {
        if let Some(ref hook) = self.got_connection {
            hook(reused, idle_time);
        }
    }
    pub fn fire_put_idle_connection(&self) {
        fire0!(self, put_idle_connection);
    }
    pub fn fire_got_first_response_byte(&self) {
        fire0!(self, got_first_response_byte);
    }
    pub fn fire_got_100_continue(&self) {
        fire0!(self, got_100_continue);
    }
    pub fn fire_got_1xx_response(&self, code: u16, headers: &[(String, Vec<u8>)]) -> Result<(), HttpExceptionContent> {
        if let Some(ref hook) = self.got_1xx_response {
            hook(code, headers)
        } else {
            Ok(())
        }
    }
    pub fn fire_dns_start(&self, host: &str) {
        if let Some(ref hook) = self.dns_start {
            hook(host);
        }
    }
    pub fn fire_dns_done(&self) {
        fire0!(self, dns_done);
    }
    pub fn fire_connect_start(&self, host: &str) {
        if let Some(ref hook) = self.connect_start {
            hook(host);
        }
    }
    pub fn fire_connect_done(&self) {
        fire0!(self, connect_done);
    }
    pub fn fire_tls_handshake_start(&self) {
        fire0!(self, tls_handshake_start);
    }
    pub fn fire_tls_handshake_done(&self) {
        fire0!(self, tls_handshake_done);
    }
    pub fn fire_wrote_header_field(&self, name: &str, value: &[u8]) {
        if let Some(ref hook) = self.wrote_header_field {
            hook(name, value);
        }
    }
    pub fn fire_wrote_headers(&self) {
        fire0!(self, wrote_headers);
    }
    pub fn fire_wait_100_continue(&self) {
        fire0!(self, wait_100_continue);
    }
    pub fn fire_wrote_request(&self) {
        fire0!(self, wrote_request);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_trace_fires_nothing() {
        let trace = RequestTrace::default();
        trace.fire_get_connection();
        trace.fire_got_connection(true, None);
    }

    #[test]
    fn hooks_are_invoked() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut trace = RequestTrace::default();
        trace.wrote_headers = Some(Arc::new(move || { c.fetch_add(1, Ordering::SeqCst); }));
        trace.fire_wrote_headers();
        trace.fire_wrote_headers();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
