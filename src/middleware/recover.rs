//! Panic containment.
//!
//! [`RecoverPanic`] is the outermost layer and the only place a panic turns
//! into a response. Everything below it returns expected failures as values;
//! a panic means a defect, so the client gets a generic `500`, the connection
//! is closed after the response, and the panic message goes to the log.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use crate::error::ApiError;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::IntoResponse;

pub struct RecoverPanic;

impl Middleware for RecoverPanic {
    fn name(&self) -> &'static str { "recover_panic" }

    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let method = req.method().clone();
        let path = req.path().to_owned();

        // `next.run` is called inside the async block so a panic while a layer
        // builds its future is caught too, not only one raised while polling.
        let downstream = AssertUnwindSafe(async move { next.run(req).await });

        Box::pin(async move {
            match downstream.catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    error!(
                        %method,
                        path = %path,
                        panic = panic_message(payload.as_ref()),
                        "request handler panicked"
                    );
                    let mut response = ApiError::InternalFault.into_response();
                    response.insert_header("connection", "close");
                    response
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use http::StatusCode;

    use super::*;
    use crate::middleware::Pipeline;
    use crate::response::Response;

    fn panicky_pipeline(calls: Arc<AtomicUsize>) -> Pipeline {
        Pipeline::over(move |req: Request| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if req.path() == "/boom" {
                    panic!("database handle went away");
                }
                Response::text("fine")
            }
        })
        .layer(RecoverPanic)
        .build()
    }

    #[tokio::test]
    async fn panic_becomes_500_and_closes_connection() {
        let pipeline = panicky_pipeline(Arc::new(AtomicUsize::new(0)));
        let response = pipeline.handle(Request::for_test("GET", "/boom")).await;

        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header("connection"), Some("close"));
        let body = std::str::from_utf8(response.body()).unwrap();
        assert!(body.contains("internal_fault"));
        assert!(!body.contains("database handle"));
    }

    #[tokio::test]
    async fn later_requests_are_served_normally() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = panicky_pipeline(Arc::clone(&calls));

        pipeline.handle(Request::for_test("GET", "/boom")).await;
        let response = pipeline.handle(Request::for_test("GET", "/fine")).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header("connection"), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn catches_panics_raised_while_building_the_future() {
        struct Explodes;
        impl Middleware for Explodes {
            fn name(&self) -> &'static str { "explodes" }
            fn call(&self, _req: Request, _next: Next) -> BoxFuture {
                panic!("synchronous failure");
            }
        }

        let pipeline = Pipeline::over(|_req: Request| async { "unreachable" })
            .layer(RecoverPanic)
            .layer(Explodes)
            .build();
        let response = pipeline.handle(Request::for_test("GET", "/")).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn headers_deferred_before_the_panic_survive() {
        struct Varies;
        impl Middleware for Varies {
            fn name(&self) -> &'static str { "varies" }
            fn call(&self, req: Request, next: Next) -> BoxFuture {
                req.defer_response_header("vary", "Authorization");
                next.run(req)
            }
        }

        let pipeline = Pipeline::over(|req: Request| async move {
            if req.path() == "/" {
                panic!("after the header was promised");
            }
            Response::text("elsewhere")
        })
        .layer(RecoverPanic)
        .layer(Varies)
        .build();

        let response = pipeline.handle(Request::for_test("GET", "/")).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header("connection"), Some("close"));
        assert_eq!(response.header("vary"), Some("Authorization"));
    }

    #[test]
    fn extracts_panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
