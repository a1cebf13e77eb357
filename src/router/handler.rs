// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    fail::Fail,
    http::{Request, Response},
};

use futures::future::LocalBoxFuture;

use std::future::Future;

//==============================================================================
// Constants & Structures
//==============================================================================

/// The capability a route target needs: turn a request into a response.
/// Anything with this one method can sit behind a route; closures get there
/// through [handler].
pub trait HttpHandler {
    fn handle_request(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, Fail>>;
}

impl std::fmt::Debug for dyn HttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn HttpHandler>")
    }
}

/// Adapter for plain async closures.
pub struct ClosureHandler<F> {
    inner: F,
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// HttpHandler trait implementation for [ClosureHandler].
impl<F, Fut> HttpHandler for ClosureHandler<F>
where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response, Fail>> + 'static,
{
    fn handle_request(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, Fail>> {
        Box::pin((self.inner)(request))
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Wraps an async closure as an [HttpHandler].
pub fn handler<F, Fut>(closure: F) -> ClosureHandler<F>
where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response, Fail>> + 'static,
{
    ClosureHandler { inner: closure }
}
