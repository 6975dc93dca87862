//! Incoming HTTP request type.
//!
//! A [`Request`] is the per-call context that flows through the pipeline.
//! Besides the HTTP envelope it carries what the layers resolve along the
//! way: the caller [`Identity`] (authentication) and the path parameters and
//! matched pattern (router).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};

use crate::identity::Identity;
use crate::response::Response;

/// Path parameters bound by the router, keyed by parameter name.
pub type Params = HashMap<String, String>;

/// Response headers promised while the request is still on its way down.
///
/// Shared between the request and the pipeline that owns it, so a header
/// registered before a panic still reaches the recovery response.
#[derive(Clone, Debug, Default)]
pub(crate) struct DeferredHeaders(Arc<Mutex<Vec<(String, String)>>>);

impl DeferredHeaders {
    fn push(&self, name: &str, value: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_owned(), value.to_owned()));
    }

    /// Appends every promised header to `response`. Runs once per request.
    pub(crate) fn apply(&self, response: &mut Response) {
        let headers = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, value) in headers {
            response.append_header(&name, &value);
        }
    }
}

/// An incoming HTTP request with its body fully buffered.
#[derive(Debug)]
pub struct Request {
    pub(crate) parts: http::request::Parts,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) params: Params,
    pub(crate) route: Option<Arc<str>>,
    pub(crate) identity: Identity,
    pub(crate) deferred: DeferredHeaders,
}

impl Request {
    /// Wraps a buffered `http::Request` received from `remote_addr`.
    ///
    /// The server calls this for every connection; tests use it to drive the
    /// pipeline without a socket.
    pub fn new(req: http::Request<Bytes>, remote_addr: SocketAddr) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            parts,
            body,
            remote_addr,
            params: Params::new(),
            route: None,
            identity: Identity::Anonymous,
            deferred: DeferredHeaders::default(),
        }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn identity(&self) -> &Identity { &self.identity }
    pub fn params(&self) -> &Params { &self.params }

    /// Extension slots for values custom layers want to hand downstream.
    pub fn extensions(&self) -> &Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.parts.extensions }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/v1/movies/:id`, `req.param("id")` on `/v1/movies/42`
    /// returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The route pattern that matched this request, once the router ran.
    pub fn matched_route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Adds a header to whatever response this request ends in, including
    /// the `500` produced when something below panics.
    pub fn defer_response_header(&self, name: &str, value: &str) {
        self.deferred.push(name, value);
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: &str, uri: &str) -> Self {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap();
        Self::new(req, "127.0.0.1:40000".parse().unwrap())
    }
}
