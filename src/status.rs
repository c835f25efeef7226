//! A deliberately small status helper (supplemented from the teacher's
//! `enums/status.rs`, which enumerates every IANA status code — out of
//! proportion here since the manager only needs the predicates below; the
//! numeric code and reason string from the wire are kept as-is on
//! [`crate::response::ResponseHead`]).

/// Status code/reason pair, as received on the wire. Unlike the teacher's
/// `Status` enum this never rejects an unrecognised code: HTTP/1.x clients
/// must tolerate codes they don't know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub fn is_informational(self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    pub fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_continue(self) -> bool {
        self.0 == 100
    }
}
