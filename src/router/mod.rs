// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Ordered route matching. Routes are tried strictly in registration order;
//! the first one whose method set, path pattern, and header predicates all
//! agree wins, and its bound path parameters ride along to the handler.

mod handler;

pub use handler::{handler, ClosureHandler, HttpHandler};

use crate::{
    fail::Fail,
    http::{Method, Request},
};

use std::rc::Rc;

//==============================================================================
// Constants & Structures
//==============================================================================

/// One element of a route's path pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentPattern {
    Literal(String),
    Parameter(String),
    Wildcard,
}

/// Pattern for a header predicate value: literal equality or a single `*`
/// wildcard at either end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValuePattern {
    Literal(String),
    Prefix(String),
    Suffix(String),
}

/// A route: method set (empty = any), path pattern, header predicates.
#[derive(Clone, Debug)]
pub struct Route {
    methods: Vec<Method>,
    segments: Vec<SegmentPattern>,
    exact: bool,
    headers: Vec<(String, ValuePattern)>,
    case_insensitive: bool,
}

/// The ordered route table.
pub struct Router {
    routes: Vec<(Route, Rc<dyn HttpHandler>)>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [ValuePattern].
impl ValuePattern {
    pub fn parse(spec: &str) -> Self {
        if spec == "*" {
            ValuePattern::Prefix(String::new())
        } else if let Some(rest) = spec.strip_prefix('*') {
            ValuePattern::Suffix(rest.to_string())
        } else if let Some(rest) = spec.strip_suffix('*') {
            ValuePattern::Prefix(rest.to_string())
        } else {
            ValuePattern::Literal(spec.to_string())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            ValuePattern::Literal(expected) => value == expected,
            ValuePattern::Prefix(prefix) => value.starts_with(prefix.as_str()),
            ValuePattern::Suffix(suffix) => value.ends_with(suffix.as_str()),
        }
    }
}

/// Associate functions for [Route].
impl Route {
    /// Parses a route from its text form: an optional comma-separated method
    /// list, whitespace, then a path pattern — `"GET,HEAD /files/:name/*"`.
    /// A lone path matches any method. A trailing `/` makes the segment count
    /// exact even under a wildcard.
    pub fn parse(spec: &str) -> Result<Self, Fail> {
        let mut tokens = spec.split_whitespace();
        let (methods, path) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(path), None, _) => (Vec::new(), path),
            (Some(methods), Some(path), None) => {
                let methods = methods
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(Method::parse)
                    .collect();
                (methods, path)
            }
            _ => return Err(Fail::Invalid { details: "route pattern" }),
        };

        let exact = path.len() > 1 && path.ends_with('/');
        let mut segments = Vec::new();
        for token in path.split('/').filter(|s| !s.is_empty()) {
            if !segments.is_empty() && segments.last() == Some(&SegmentPattern::Wildcard) {
                return Err(Fail::Invalid { details: "wildcard must be the last segment" });
            }
            let pattern = if token == "*" {
                SegmentPattern::Wildcard
            } else if let Some(name) = token.strip_prefix(':') {
                if name.is_empty() {
                    return Err(Fail::Invalid { details: "empty parameter name" });
                }
                SegmentPattern::Parameter(name.to_string())
            } else {
                SegmentPattern::Literal(token.to_string())
            };
            segments.push(pattern);
        }

        Ok(Self { methods, segments, exact, headers: Vec::new(), case_insensitive: false })
    }

    /// Adds a header predicate.
    pub fn with_header<N: Into<String>>(mut self, name: N, pattern: &str) -> Self {
        self.headers.push((name.into(), ValuePattern::parse(pattern)));
        self
    }

    /// Switches literal segments to case-insensitive comparison.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Matches a request, returning the bound parameters in pattern order.
    pub fn matches(&self, request: &Request) -> Option<Vec<(String, String)>> {
        if !self.methods.is_empty() && !self.methods.contains(request.method()) {
            return None;
        }

        let segments = request.segments();
        let mut params = Vec::new();
        let mut consumed = 0;
        for pattern in &self.segments {
            match pattern {
                SegmentPattern::Wildcard => {
                    if self.exact && segments.len() != self.segments.len() {
                        return None;
                    }
                    consumed = segments.len();
                    break;
                }
                SegmentPattern::Parameter(name) => {
                    let value = segments.get(consumed)?;
                    params.push((name.clone(), value.clone()));
                    consumed += 1;
                }
                SegmentPattern::Literal(expected) => {
                    let value = segments.get(consumed)?;
                    let equal = if self.case_insensitive {
                        expected.eq_ignore_ascii_case(value)
                    } else {
                        expected == value
                    };
                    if !equal {
                        return None;
                    }
                    consumed += 1;
                }
            }
        }
        if consumed != segments.len() {
            return None;
        }

        for (name, pattern) in &self.headers {
            let value = request.header(name)?;
            if !pattern.matches(value) {
                return None;
            }
        }
        Some(params)
    }
}

/// Associate functions for [Router].
impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route; registration order is precedence order.
    pub fn append(&mut self, route: Route, handler: Rc<dyn HttpHandler>) {
        self.routes.push((route, handler));
    }

    /// First-match-wins lookup. [Fail::Unhandled] when nothing matches; the
    /// driver maps that to a 404.
    pub fn lookup(
        &self,
        request: &Request,
    ) -> Result<(Rc<dyn HttpHandler>, Vec<(String, String)>), Fail> {
        for (route, handler) in &self.routes {
            if let Some(params) = route.matches(request) {
                return Ok((handler.clone(), params));
            }
        }
        Err(Fail::Unhandled {})
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default trait implementation for [Router].
impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::decoder::{HeadDecoder, DEFAULT_BUFFER_SIZE};
    use crate::http::{Body, Response};

    fn request(wire: &str) -> Request {
        let mut buf = bytes::BytesMut::from(wire.as_bytes());
        let head = HeadDecoder::new(DEFAULT_BUFFER_SIZE).decode(&mut buf).unwrap().unwrap();
        Request::new(head, Body::empty())
    }

    fn get(path: &str) -> Request {
        request(&format!("GET {} HTTP/1.1\r\n\r\n", path))
    }

    fn ok_handler() -> Rc<dyn HttpHandler> {
        Rc::new(handler(|_req| async { Ok(Response::new(200)) }))
    }

    /// Tests method filtering, empty set matching anything.
    #[test]
    fn router_method_filter() {
        let route = Route::parse("GET,HEAD /x").unwrap();
        assert!(route.matches(&get("/x")).is_some());
        assert!(route.matches(&request("POST /x HTTP/1.1\r\n\r\n")).is_none());
        let any = Route::parse("/x").unwrap();
        assert!(any.matches(&request("POST /x HTTP/1.1\r\n\r\n")).is_some());
    }

    /// Tests parameter binding in pattern order.
    #[test]
    fn router_parameters_bind() {
        let route = Route::parse("GET /users/:user/posts/:post").unwrap();
        let params = route.matches(&get("/users/ada/posts/42")).unwrap();
        assert_eq!(
            params,
            vec![("user".to_string(), "ada".to_string()), ("post".to_string(), "42".to_string())]
        );
    }

    /// Tests wildcard tails and the exact-length default.
    #[test]
    fn router_wildcard_and_length() {
        let wild = Route::parse("GET /a/*").unwrap();
        assert!(wild.matches(&get("/a/b")).is_some());
        assert!(wild.matches(&get("/a/b/c/d")).is_some());
        assert!(wild.matches(&get("/a")).is_some());

        // Without a wildcard, extra segments do not match.
        let plain = Route::parse("GET /a/b").unwrap();
        assert!(plain.matches(&get("/a/b")).is_some());
        assert!(plain.matches(&get("/a/b/c")).is_none());
        assert!(plain.matches(&get("/a")).is_none());

        // A trailing slash pins the segment count even under a wildcard.
        let pinned = Route::parse("GET /a/*/").unwrap();
        assert!(pinned.matches(&get("/a/b")).is_some());
        assert!(pinned.matches(&get("/a/b/c")).is_none());
    }

    /// Tests case sensitivity switch.
    #[test]
    fn router_case_sensitivity() {
        let route = Route::parse("GET /Files").unwrap();
        assert!(route.matches(&get("/files")).is_none());
        let relaxed = Route::parse("GET /Files").unwrap().case_insensitive();
        assert!(relaxed.matches(&get("/files")).is_some());
    }

    /// Tests header predicates with literal and wildcard values.
    #[test]
    fn router_header_predicates() {
        let route = Route::parse("GET /ws")
            .unwrap()
            .with_header("Upgrade", "websocket")
            .with_header("Accept", "text/*");
        let hit = request("GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nAccept: text/html\r\n\r\n");
        assert!(route.matches(&hit).is_some());
        let miss = request("GET /ws HTTP/1.1\r\nUpgrade: h2c\r\nAccept: text/html\r\n\r\n");
        assert!(route.matches(&miss).is_none());
        let absent = request("GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        assert!(route.matches(&absent).is_none());

        let suffix = Route::parse("GET /dl").unwrap().with_header("Accept", "*json");
        let hit = request("GET /dl HTTP/1.1\r\nAccept: application/json\r\n\r\n");
        assert!(suffix.matches(&hit).is_some());
    }

    /// Tests first-match-wins precedence: insertion order decides.
    #[test]
    fn router_precedence_is_insertion_order() {
        struct Tagged(u16);
        impl HttpHandler for Tagged {
            fn handle_request(
                &self,
                _request: Request,
            ) -> futures::future::LocalBoxFuture<'static, Result<Response, Fail>> {
                let status = self.0;
                Box::pin(async move { Ok(Response::new(status)) })
            }
        }

        let mut router = Router::new();
        router.append(Route::parse("GET /a/*").unwrap(), Rc::new(Tagged(201)));
        router.append(Route::parse("GET /a/b").unwrap(), Rc::new(Tagged(202)));

        let (handler, _params) = router.lookup(&get("/a/b")).unwrap();
        let response = futures::executor::block_on(handler.handle_request(get("/a/b"))).unwrap();
        assert_eq!(response.status(), 201);
    }

    /// Tests the unhandled signal.
    #[test]
    fn router_unhandled() {
        let mut router = Router::new();
        router.append(Route::parse("GET /only").unwrap(), ok_handler());
        assert_eq!(router.lookup(&get("/other")).unwrap_err(), Fail::Unhandled {});
    }

    /// Tests route parse failures.
    #[test]
    fn router_parse_errors() {
        assert!(Route::parse("GET /a/*/b").is_err());
        assert!(Route::parse("GET /a/:").is_err());
        assert!(Route::parse("GET /a b c").is_err());
    }
}
