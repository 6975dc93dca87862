//! Caller identity resolution.
//!
//! | `Authorization` header          | Outcome                                   |
//! |---------------------------------|-------------------------------------------|
//! | absent                          | anonymous, continue                       |
//! | not `Bearer <token>`            | `401 invalid_credentials`, stop           |
//! | `Bearer <token>`, rejected      | `401 invalid_or_expired_token`, stop      |
//! | `Bearer <token>`, validated     | user attached to the request, continue    |
//!
//! Validation is delegated to a [`TokenValidator`] and bounded by a timeout,
//! so a slow validator costs one request a `401`, not the server its workers.
//! This layer only resolves identity; permission checks belong to handlers.

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::handler::BoxFuture;
use crate::identity::Identity;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::IntoResponse;
use crate::token::TokenValidator;

/// What the `Authorization` header holds, before any validation.
#[derive(Debug, PartialEq, Eq)]
pub enum Credentials {
    Missing,
    Malformed,
    Bearer(String),
}

impl Credentials {
    pub fn from_request(req: &Request) -> Self {
        let Some(value) = req.headers().get(http::header::AUTHORIZATION) else {
            return Self::Missing;
        };
        let Ok(value) = value.to_str() else {
            return Self::Malformed;
        };
        match value.split_once(' ') {
            Some((scheme, token))
                if scheme.eq_ignore_ascii_case("bearer")
                    && !token.is_empty()
                    && !token.contains(char::is_whitespace) =>
            {
                Self::Bearer(token.to_owned())
            }
            _ => Self::Malformed,
        }
    }
}

/// The authentication layer.
pub struct Authenticate {
    validator: Arc<dyn TokenValidator>,
    timeout: Duration,
}

impl Authenticate {
    pub fn new(validator: Arc<dyn TokenValidator>, config: AuthConfig) -> Self {
        Self { validator, timeout: config.validation_timeout }
    }
}

impl Middleware for Authenticate {
    fn name(&self) -> &'static str { "authenticate" }

    fn call(&self, mut req: Request, next: Next) -> BoxFuture {
        // Deferred rather than appended on the way out, so a panic further
        // down still produces a response that varies on the header.
        req.defer_response_header("vary", "Authorization");

        match Credentials::from_request(&req) {
            Credentials::Missing => {
                req.set_identity(Identity::Anonymous);
                next.run(req)
            }
            Credentials::Malformed => {
                debug!(path = req.path(), "malformed authorization header");
                Box::pin(ready(ApiError::InvalidCredentials.into_response()))
            }
            Credentials::Bearer(token) => {
                let validator = Arc::clone(&self.validator);
                let timeout = self.timeout;
                Box::pin(async move {
                    match tokio::time::timeout(timeout, validator.validate(&token)).await {
                        Ok(Ok(user)) => {
                            debug!(user_id = user.id, "authenticated");
                            req.set_identity(Identity::User(user));
                            next.run(req).await
                        }
                        Ok(Err(e)) => {
                            debug!(error = %e, "token rejected");
                            ApiError::InvalidOrExpiredToken.into_response()
                        }
                        Err(_) => {
                            warn!(?timeout, "token validation timed out");
                            ApiError::InvalidOrExpiredToken.into_response()
                        }
                    }
                })
            }
        }
    }
}
