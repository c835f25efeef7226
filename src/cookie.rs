//! Cookie jar data model (C9).
//!
//! This is deliberately a data structure only: the algorithms that absorb
//! `Set-Cookie` headers into a jar or emit a jar's cookies as a `Cookie`
//! request header are out of scope (spec.md §1) and live in a layer above
//! this crate.

use std::time::SystemTime;

/// A single cookie, per RFC 6265 §5.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expiry: Option<SystemTime>,
    pub domain: String,
    pub path: String,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub persistent: bool,
    pub host_only: bool,
    pub secure_only: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Field-by-field bit equality.
    pub fn equal(&self, other: &Cookie) -> bool {
        self == other
    }

    /// The identity used when merging jars: `(name, case-folded domain,
    /// path)`. Two cookies that are `equiv` are considered "the same
    /// cookie" for replacement purposes even if other fields differ.
    pub fn equiv(&self, other: &Cookie) -> bool {
        self.name == other.name
            && self.domain.eq_ignore_ascii_case(&other.domain)
            && self.path == other.path
    }

    fn equiv_key(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.to_ascii_lowercase(), self.path.clone())
    }
}

/// An unordered collection of cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar { cookies: Vec::new() }
    }

    pub fn from_cookies(cookies: Vec<Cookie>) -> CookieJar {
        CookieJar { cookies }
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// `merge(a, b)`: concatenate, sort by creation time (newest first),
    /// then deduplicate by `equiv`, keeping the first (newest) occurrence
    /// of each identity.
    pub fn merge(&self, other: &CookieJar) -> CookieJar {
        let mut all: Vec<Cookie> = self.cookies.iter().cloned()
            .chain(other.cookies.iter().cloned())
            .collect();
        all.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));

        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(all.len());
        for cookie in all {
            let key = cookie.equiv_key();
            if seen.insert(key) {
                merged.push(cookie);
            }
        }
        CookieJar { cookies: merged }
    }

    /// Canonical ordering for `equiv` comparison: `(path length
    /// descending, creation time descending)`, per spec.md §4.7.
    fn canonical_order(&self) -> Vec<&Cookie> {
        let mut sorted: Vec<&Cookie> = self.cookies.iter().collect();
        sorted.sort_by(|a, b| {
            b.path.len().cmp(&a.path.len())
                .then_with(|| b.creation_time.cmp(&a.creation_time))
        });
        sorted
    }

    /// Set-equality under the `equiv` relation, after sorting both jars
    /// into canonical order.
    pub fn equiv(&self, other: &CookieJar) -> bool {
        if self.cookies.len() != other.cookies.len() {
            return false;
        }
        let a = self.canonical_order();
        let b = other.canonical_order();
        a.iter().zip(b.iter()).all(|(x, y)| x.equiv(y))
    }

    /// Bit-equal lists (order-sensitive).
    pub fn equal(&self, other: &CookieJar) -> bool {
        self.cookies == other.cookies
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn cookie(name: &str, domain: &str, path: &str, age_secs: u64) -> Cookie {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        Cookie {
            name: name.to_string(),
            value: "v".to_string(),
            expiry: None,
            domain: domain.to_string(),
            path: path.to_string(),
            creation_time: now - Duration::from_secs(age_secs),
            last_access_time: now,
            persistent: false,
            host_only: false,
            secure_only: false,
            http_only: false,
        }
    }

    #[test]
    fn merge_is_commutative_under_equiv() {
        let a = CookieJar::from_cookies(vec![
            cookie("sid", "example.com", "/", 10),
            cookie("theme", "example.com", "/", 5),
        ]);
        let b = CookieJar::from_cookies(vec![
            cookie("sid", "example.com", "/", 1),
        ]);
        let merged_ab = a.merge(&b);
        let merged_ba = b.merge(&a);
        assert!(merged_ab.equiv(&merged_ba));
    }

    #[test]
    fn merge_deduplicates_by_equiv_keeping_newest() {
        let older = cookie("sid", "example.com", "/", 100);
        let newer = cookie("sid", "example.com", "/", 1);
        let a = CookieJar::from_cookies(vec![older.clone()]);
        let b = CookieJar::from_cookies(vec![newer.clone()]);
        let merged = a.merge(&b);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.cookies()[0].creation_time, newer.creation_time);
    }

    #[test]
    fn equiv_ignores_domain_case() {
        let a = cookie("sid", "Example.COM", "/", 0);
        let b = cookie("sid", "example.com", "/", 0);
        assert!(a.equiv(&b));
        assert!(!a.equal(&b));
    }
}
