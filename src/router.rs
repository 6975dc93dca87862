//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Literal segments always
//! win over parameter segments at the same position, so `/v1/users/activated`
//! is never shadowed by `/v1/users/:id`, whatever the registration order.
//!
//! Every lookup ends in exactly one of three outcomes ([`Lookup`]): a matched
//! handler with its bound parameters, "no path matches", or "the path matches
//! but not for this method". The router then invokes exactly one handler:
//! the route's, or one of the two fallbacks.

use std::collections::HashMap;
use std::future::ready;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::error::{allow_header, ApiError, Error};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::request::{Params, Request};
use crate::response::{IntoResponse, Response};

/// Methods valid for a path, handed to a custom method-not-allowed handler
/// through [`Request::extensions`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllowedMethods(pub Vec<Method>);

struct Route {
    pattern: Arc<str>,
    handler: BoxedHandler,
}

/// Result of matching a (method, path) pair against the route table.
pub enum Lookup {
    Matched {
        handler: BoxedHandler,
        params: Params,
        pattern: Arc<str>,
    },
    NotFound,
    MethodNotAllowed {
        /// Sorted by method name.
        allowed: Vec<Method>,
    },
}

/// The application router.
///
/// Build it once at startup and hand it to the pipeline; it is read-only from
/// then on and shared across connections without locking. Each registration
/// returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
    not_found: Option<BoxedHandler>,
    method_not_allowed: Option<BoxedHandler>,
    handle_options: bool,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            not_found: None,
            method_not_allowed: None,
            handle_options: true,
        }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `:name` (or `{name}`) syntax and are read back with
    /// `req.param("name")`:
    ///
    /// ```rust
    /// # use greenlight::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn show_movie(_: Request) -> Response { Response::text("") }
    /// # async fn create_movie(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/v1/movies/:id", show_movie)
    ///     .on(Method::POST, "/v1/movies",     create_movie);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the pattern is invalid or conflicts with one already
    /// registered for the same method. Use [`Router::try_on`] to handle that
    /// as an error instead.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.try_on(method, path, handler)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible form of [`Router::on`].
    pub fn try_on(mut self, method: Method, path: &str, handler: impl Handler) -> Result<Self, Error> {
        let route = Route { pattern: Arc::from(path), handler: handler.into_boxed_handler() };
        self.routes
            .entry(method)
            .or_default()
            .insert(normalize_pattern(path), route)
            .map_err(|source| Error::InvalidRoute { path: path.to_owned(), source })?;
        Ok(self)
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self { self.on(Method::GET, path, handler) }
    pub fn post(self, path: &str, handler: impl Handler) -> Self { self.on(Method::POST, path, handler) }
    pub fn put(self, path: &str, handler: impl Handler) -> Self { self.on(Method::PUT, path, handler) }
    pub fn patch(self, path: &str, handler: impl Handler) -> Self { self.on(Method::PATCH, path, handler) }
    pub fn delete(self, path: &str, handler: impl Handler) -> Self { self.on(Method::DELETE, path, handler) }

    /// Replaces the default `404` JSON error.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Replaces the default `405` JSON error. The handler finds the valid
    /// methods in [`AllowedMethods`]; the `Allow` header is set regardless.
    pub fn method_not_allowed(mut self, handler: impl Handler) -> Self {
        self.method_not_allowed = Some(handler.into_boxed_handler());
        self
    }

    /// Whether `OPTIONS` requests for a known path are answered automatically
    /// with `204` and an `Allow` header. On by default.
    pub fn handle_options(mut self, enabled: bool) -> Self {
        self.handle_options = enabled;
        self
    }

    /// Matches `method` + `path` against the route table.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Matched {
                handler: Arc::clone(&matched.value.handler),
                params,
                pattern: Arc::clone(&matched.value.pattern),
            };
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed { allowed }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Dispatch: the router is the terminal handler of the pipeline.
impl ErasedHandler for Router {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Lookup::Matched { handler, params, pattern } => {
                req.params = params;
                req.route = Some(pattern);
                handler.call(req)
            }
            Lookup::NotFound => {
                debug!(method = %req.method(), path = req.path(), "no route matched");
                match &self.not_found {
                    Some(handler) => handler.call(req),
                    None => Box::pin(ready(ApiError::NotFound.into_response())),
                }
            }
            Lookup::MethodNotAllowed { allowed } => {
                if self.handle_options && req.method() == Method::OPTIONS {
                    let mut methods = allowed;
                    methods.push(Method::OPTIONS);
                    let response = Response::builder()
                        .status(StatusCode::NO_CONTENT)
                        .header("allow", &allow_header(&methods))
                        .no_body();
                    return Box::pin(ready(response));
                }

                debug!(method = %req.method(), path = req.path(), "method not allowed");
                match &self.method_not_allowed {
                    Some(handler) => {
                        let allow = allow_header(&allowed);
                        req.extensions_mut().insert(AllowedMethods(allowed));
                        let fut = handler.call(req);
                        Box::pin(async move {
                            let mut response = fut.await;
                            response.insert_header("allow", &allow);
                            response
                        })
                    }
                    None => {
                        let err = ApiError::MethodNotAllowed { method: req.method().clone(), allowed };
                        Box::pin(ready(err.into_response()))
                    }
                }
            }
        }
    }
}

/// Rewrites `:name` / `*name` segments into the tree's `{name}` / `{*name}` form.
fn normalize_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
