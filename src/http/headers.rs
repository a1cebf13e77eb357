// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::fmt;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Well-known header names.
pub mod header {
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_RANGE: &str = "Content-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const HOST: &str = "Host";
    pub const RANGE: &str = "Range";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const UPGRADE: &str = "Upgrade";
}

/// Ordered, case-insensitive header mapping. Lookup ignores ASCII case;
/// emission preserves both insertion order and the spelling the header was
/// first written with.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [HeaderMap].
impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing every existing spelling of it. Last write
    /// wins: the value lands at the end of the emission order.
    pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Appends a header as it arrived off the wire: a repeated name joins the
    /// existing value with `", "` (RFC 7230 §3.2.2).
    pub fn append_wire<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Debug trait implementation for [HeaderMap].
impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(n, v)| (n, v))).finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests case-insensitive lookup with preserved spelling.
    #[test]
    fn headers_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.append_wire("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.iter().next(), Some(("Content-Type", "text/plain")));
    }

    /// Tests that wire duplicates join with a comma.
    #[test]
    fn headers_wire_duplicates_join() {
        let mut headers = HeaderMap::new();
        headers.append_wire("Accept", "text/html");
        headers.append_wire("accept", "text/plain");
        assert_eq!(headers.get("Accept"), Some("text/html, text/plain"));
        assert_eq!(headers.len(), 1);
    }

    /// Tests that set is last-write-wins.
    #[test]
    fn headers_set_replaces() {
        let mut headers = HeaderMap::new();
        headers.append_wire("X-Token", "a");
        headers.set("x-token", "b");
        assert_eq!(headers.get("X-Token"), Some("b"));
        assert_eq!(headers.len(), 1);
    }
}
