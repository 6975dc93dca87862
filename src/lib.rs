//! # greenlight
//!
//! The request front end of the greenlight movie API: a path router and the
//! fixed middleware pipeline every request passes through.
//!
//! ```text
//! request ─▶ RecoverPanic ─▶ RateLimit ─▶ Authenticate ─▶ Router ─▶ handler
//! ```
//!
//! - **RecoverPanic** turns a panicking handler into a `500` and keeps the
//!   process serving.
//! - **RateLimit** runs a token bucket per client and answers `429` before any
//!   authentication work is spent.
//! - **Authenticate** resolves the caller from a bearer token, or leaves the
//!   request anonymous.
//! - **Router** picks exactly one handler, binds path parameters, and answers
//!   unknown paths and methods with structured JSON errors.
//!
//! Resource handlers are opaque to this crate: any
//! `async fn(Request) -> impl IntoResponse` will do.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use greenlight::{api, Config, MemoryTokenStore, Pipeline, Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), greenlight::Error> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let router = api::routes(|_endpoint| show);
//!     let app = Pipeline::standard(&config, router, Arc::new(MemoryTokenStore::new()));
//!
//!     Server::bind("0.0.0.0:4000".parse().unwrap()).serve(app).await
//! }
//!
//! async fn show(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("none");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//! ```

mod error;
mod handler;
mod identity;
mod request;
mod response;
mod router;
mod server;

pub mod api;
pub mod config;
pub mod middleware;
pub mod token;

pub use config::Config;
pub use error::{ApiError, Error};
pub use handler::{BoxFuture, Handler};
pub use identity::{Identity, User};
pub use middleware::{Middleware, Next, Pipeline};
pub use request::{Params, Request};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{AllowedMethods, Lookup, Router};
pub use server::{serve_listener, Server};
pub use token::{MemoryTokenStore, TokenError, TokenValidator};
