//! The movie API's route table.
//!
//! The resource handlers themselves live outside this crate. [`routes`] only
//! fixes *which* endpoints exist and where; the caller supplies a handler for
//! each [`Endpoint`].

use std::fmt;

use http::Method;

use crate::handler::Handler;
use crate::router::Router;

/// Every endpoint the API exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Healthcheck,
    ListMovies,
    CreateMovie,
    ShowMovie,
    UpdateMovie,
    DeleteMovie,
    RegisterUser,
    ActivateUser,
    CreateAuthenticationToken,
}

impl Endpoint {
    pub const ALL: [Endpoint; 9] = [
        Self::Healthcheck,
        Self::ListMovies,
        Self::CreateMovie,
        Self::ShowMovie,
        Self::UpdateMovie,
        Self::DeleteMovie,
        Self::RegisterUser,
        Self::ActivateUser,
        Self::CreateAuthenticationToken,
    ];

    pub fn method(self) -> Method {
        match self {
            Self::Healthcheck               => Method::GET,
            Self::ListMovies                => Method::GET,
            Self::CreateMovie               => Method::POST,
            Self::ShowMovie                 => Method::GET,
            Self::UpdateMovie               => Method::PATCH,
            Self::DeleteMovie               => Method::DELETE,
            Self::RegisterUser              => Method::POST,
            Self::ActivateUser              => Method::PUT,
            Self::CreateAuthenticationToken => Method::POST,
        }
    }

    pub fn pattern(self) -> &'static str {
        match self {
            Self::Healthcheck               => "/v1/healthcheck",
            Self::ListMovies                => "/v1/movies",
            Self::CreateMovie               => "/v1/movies",
            Self::ShowMovie                 => "/v1/movies/:id",
            Self::UpdateMovie               => "/v1/movies/:id",
            Self::DeleteMovie               => "/v1/movies/:id",
            Self::RegisterUser              => "/v1/users",
            Self::ActivateUser              => "/v1/users/activated",
            Self::CreateAuthenticationToken => "/v1/tokens/authentication",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Healthcheck               => "healthcheck",
            Self::ListMovies                => "list_movies",
            Self::CreateMovie               => "create_movie",
            Self::ShowMovie                 => "show_movie",
            Self::UpdateMovie               => "update_movie",
            Self::DeleteMovie               => "delete_movie",
            Self::RegisterUser              => "register_user",
            Self::ActivateUser              => "activate_user",
            Self::CreateAuthenticationToken => "create_authentication_token",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the router with one route per [`Endpoint`], asking `handler_for`
/// for each handler.
pub fn routes<F, H>(mut handler_for: F) -> Router
where
    F: FnMut(Endpoint) -> H,
    H: Handler,
{
    Endpoint::ALL.into_iter().fold(Router::new(), |router, endpoint| {
        router.on(endpoint.method(), endpoint.pattern(), handler_for(endpoint))
    })
}
