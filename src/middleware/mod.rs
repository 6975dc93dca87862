//! Middleware layer.
//!
//! A [`Pipeline`] is an explicit, ordered list of [`Middleware`] layers around
//! a terminal endpoint (normally the [`Router`]). The first layer added is the
//! outermost. Each layer receives the request plus a [`Next`] handle and
//! decides whether to call it; a layer that answers on its own (a rate-limit
//! or credential rejection) simply never runs `next`.
//!
//! ```text
//! request ─▶ recover_panic ─▶ rate_limit ─▶ authenticate ─▶ router ─▶ handler
//! ```
//!
//! [`Pipeline::standard`] builds exactly that chain. Because the endpoint is
//! just a [`Handler`], every layer can be tested in isolation by wrapping a
//! stub endpoint instead of a router.

mod auth;
mod rate_limit;
mod recover;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::router::Router;
use crate::token::TokenValidator;

pub use auth::{Authenticate, Credentials};
pub use rate_limit::{Decision, RateLimit, RateLimiter};
pub use recover::RecoverPanic;

/// A cross-cutting layer wrapped around the rest of the pipeline.
pub trait Middleware: Send + Sync + 'static {
    /// Short stable name, used in logs and to audit layer order.
    fn name(&self) -> &'static str;

    /// Handles `req`, delegating to `next` to continue down the chain.
    fn call(&self, req: Request, next: Next) -> BoxFuture;

    /// Starts any background upkeep the layer needs (e.g. evicting idle
    /// state). Called once by the server after it starts listening.
    fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        None
    }
}

/// The remainder of the pipeline after the current layer.
#[derive(Clone)]
pub struct Next {
    layers: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    endpoint: BoxedHandler,
}

impl Next {
    /// Runs the next layer, or the endpoint once the layers are exhausted.
    pub fn run(self, req: Request) -> BoxFuture {
        match self.layers.get(self.index) {
            Some(layer) => {
                let layer = Arc::clone(layer);
                layer.call(req, Next { index: self.index + 1, ..self })
            }
            None => self.endpoint.call(req),
        }
    }
}

/// An assembled middleware chain. Cheap to share behind an `Arc`.
pub struct Pipeline {
    layers: Arc<[Arc<dyn Middleware>]>,
    endpoint: BoxedHandler,
}

impl Pipeline {
    /// Starts a pipeline that ends in `router`.
    pub fn builder(router: Router) -> PipelineBuilder {
        PipelineBuilder { layers: Vec::new(), endpoint: Arc::new(router) }
    }

    /// Starts a pipeline that ends in an arbitrary handler.
    pub fn over(endpoint: impl Handler) -> PipelineBuilder {
        PipelineBuilder { layers: Vec::new(), endpoint: endpoint.into_boxed_handler() }
    }

    /// The production chain: `RecoverPanic(RateLimit(Authenticate(router)))`.
    ///
    /// The order is fixed. Recovery must wrap everything, and rate limiting
    /// must reject before any token validation work is spent.
    pub fn standard(config: &Config, router: Router, validator: Arc<dyn TokenValidator>) -> Self {
        Self::builder(router)
            .layer(RecoverPanic)
            .layer(RateLimit::new(config.limiter.clone()))
            .layer(Authenticate::new(validator, config.auth.clone()))
            .build()
    }

    /// Layer names, outermost first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Runs `req` through every layer and the endpoint, then applies the
    /// headers layers deferred with [`Request::defer_response_header`].
    pub fn handle(&self, req: Request) -> BoxFuture {
        let deferred = req.deferred.clone();
        let downstream = Next {
            layers: Arc::clone(&self.layers),
            index: 0,
            endpoint: Arc::clone(&self.endpoint),
        }
        .run(req);

        Box::pin(async move {
            let mut response = downstream.await;
            deferred.apply(&mut response);
            response
        })
    }

    /// Spawns each layer's background upkeep task.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        self.layers.iter().filter_map(|layer| layer.spawn_maintenance()).collect()
    }
}

pub struct PipelineBuilder {
    layers: Vec<Arc<dyn Middleware>>,
    endpoint: BoxedHandler,
}

impl PipelineBuilder {
    /// Appends a layer inside the ones already added.
    pub fn layer(mut self, layer: impl Middleware) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline { layers: self.layers.into(), endpoint: self.endpoint }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::response::Response;
    use crate::token::MemoryTokenStore;

    /// Records its name on the way in and on the way out.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn name(&self) -> &'static str { self.name }

        fn call(&self, req: Request, next: Next) -> BoxFuture {
            let name = self.name;
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("{name}>"));
                let response = next.run(req).await;
                log.lock().unwrap().push(format!("<{name}"));
                response
            })
        }
    }

    #[tokio::test]
    async fn layers_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let endpoint_log = Arc::clone(&log);
        let pipeline = Pipeline::over(move |_req: Request| {
            let log = Arc::clone(&endpoint_log);
            async move {
                log.lock().unwrap().push("endpoint".to_owned());
                Response::text("ok")
            }
        })
        .layer(Trace { name: "outer", log: Arc::clone(&log) })
        .layer(Trace { name: "inner", log: Arc::clone(&log) })
        .build();

        pipeline.handle(Request::for_test("GET", "/")).await;
        assert_eq!(*log.lock().unwrap(), ["outer>", "inner>", "endpoint", "<inner", "<outer"]);
    }

    #[test]
    fn standard_order_is_fixed() {
        let pipeline = Pipeline::standard(
            &Config::default(),
            Router::new(),
            Arc::new(MemoryTokenStore::new()),
        );
        assert_eq!(pipeline.layer_names(), ["recover_panic", "rate_limit", "authenticate"]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_just_the_endpoint() {
        let pipeline = Pipeline::over(|_req: Request| async { "bare" }).build();
        let response = pipeline.handle(Request::for_test("GET", "/")).await;
        assert_eq!(response.body(), b"bare");
        assert!(pipeline.spawn_maintenance().is_empty());
    }
}
