//! Handlers and the one erased type every endpoint is stored as.
//!
//! Route handlers, the two router fallbacks and the router itself (as the
//! last stop of a [`Pipeline`](crate::Pipeline)) are all reached the same way:
//! an `Arc<dyn ErasedHandler>` whose `call` yields a [`BoxFuture`].
//!
//! ```text
//! router.get("/v1/movies/:id", show_movie)
//!   └─ show_movie.into_boxed_handler()   Arc<FnHandler<show_movie>>
//!        └─ .call(req)                   Box::pin(show_movie(req) → Response)
//!
//! Pipeline::builder(router)
//!   └─ Arc::new(router)                  Router implements ErasedHandler
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// The future every handler and middleware layer resolves to.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Uniform call interface behind [`BoxedHandler`].
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Anything that can answer a request: an `async fn(Request) -> impl
/// IntoResponse`, or a closure returning such a future.
///
/// Sealed. Custom request processing belongs in a
/// [`Middleware`](crate::Middleware) layer instead.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let pending = (self.0)(req);
        Box::pin(async move { pending.await.into_response() })
    }
}
