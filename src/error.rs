//! Error types.
//!
//! Two families live here and they never mix:
//!
//! - [`Error`] surfaces infrastructure failures: binding a port, registering
//!   a conflicting route, starting with a nonsensical configuration.
//! - [`ApiError`] is the taxonomy of expected request outcomes (404, 405, 429,
//!   401, 500). These are turned into structured JSON responses, never
//!   propagated as `Err`.

use std::time::Duration;

use http::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::response::{IntoResponse, Response};

/// The error type returned by greenlight's fallible startup operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{path}`: {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Every structured error a request can end in.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the {method} method is not supported for this resource")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("invalid or expired authentication token")]
    InvalidOrExpiredToken,

    #[error("the server encountered a problem and could not process your request")]
    InternalFault,
}

impl ApiError {
    /// Machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound                  => "not_found",
            Self::MethodNotAllowed { .. }   => "method_not_allowed",
            Self::RateLimitExceeded { .. }  => "rate_limit_exceeded",
            Self::InvalidCredentials        => "invalid_credentials",
            Self::InvalidOrExpiredToken     => "invalid_or_expired_token",
            Self::InternalFault             => "internal_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound                  => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. }   => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimitExceeded { .. }  => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredentials        => StatusCode::UNAUTHORIZED,
            Self::InvalidOrExpiredToken     => StatusCode::UNAUTHORIZED,
            Self::InternalFault             => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: Body<'a>,
}

#[derive(Serialize)]
struct Body<'a> {
    kind: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<&'a str>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let allowed = match &self {
            Self::MethodNotAllowed { allowed, .. } => Some(allowed.iter().map(Method::as_str).collect()),
            _ => None,
        };
        let envelope = Envelope {
            error: Body { kind: self.kind(), message: self.to_string(), allowed },
        };

        let mut response = Response::serialize(self.status(), &envelope);
        match &self {
            Self::MethodNotAllowed { allowed, .. } => {
                response.insert_header("allow", &allow_header(allowed));
            }
            Self::RateLimitExceeded { retry_after } => {
                // Retry-After is whole seconds; never advertise zero.
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                response.insert_header("retry-after", &secs.to_string());
            }
            Self::InvalidCredentials | Self::InvalidOrExpiredToken => {
                response.insert_header("www-authenticate", "Bearer");
            }
            Self::NotFound | Self::InternalFault => {}
        }
        response
    }
}

/// Renders a method list as an `Allow` header value (`"DELETE, GET, PATCH"`).
pub(crate) fn allow_header(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
}
