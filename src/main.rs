//! greenlight API server.
//!
//! Run with:
//!   RUST_LOG=info cargo run -- --port 4000 --limiter-rps 2 --limiter-burst 4
//!
//! Try:
//!   curl -i localhost:4000/v1/healthcheck
//!   curl -i localhost:4000/v1/movies/42
//!   curl -i -X PUT localhost:4000/v1/movies/42          # 405
//!   curl -i -H 'Authorization: Bearer ' localhost:4000/v1/movies   # 401

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use http::StatusCode;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use greenlight::api::{self, Endpoint};
use greenlight::config::{AuthConfig, ClientKey, RateLimitConfig};
use greenlight::token::is_plaintext_token;
use greenlight::{Config, Error, MemoryTokenStore, Pipeline, Request, Response, Server, User};

#[derive(Debug, Parser)]
#[command(name = "greenlight", version, about = "greenlight movie API server")]
struct Cli {
    /// API server port
    #[arg(long, env = "GREENLIGHT_PORT", default_value_t = 4000)]
    port: u16,

    /// Environment (development|staging|production)
    #[arg(long, env = "GREENLIGHT_ENV", default_value = "development")]
    env: String,

    /// Rate limiter maximum requests per second
    #[arg(long, default_value_t = 2.0)]
    limiter_rps: f64,

    /// Rate limiter maximum burst
    #[arg(long, default_value_t = 4)]
    limiter_burst: u32,

    /// Enable rate limiter
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    limiter_enabled: bool,

    /// Seconds without requests before a client's bucket is dropped
    #[arg(long, default_value_t = 180)]
    limiter_idle_secs: u64,

    /// Seconds between idle-bucket sweeps
    #[arg(long, default_value_t = 60)]
    limiter_sweep_secs: u64,

    /// Client identity for rate limiting: `peer` or `forwarded`
    #[arg(long, default_value = "peer")]
    limiter_key: ClientKey,

    /// Token validation timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    auth_timeout_ms: u64,

    /// Register a plaintext bearer token for a local admin user
    #[arg(long, env = "GREENLIGHT_SEED_TOKEN")]
    seed_token: Option<String>,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            limiter: RateLimitConfig {
                enabled: self.limiter_enabled,
                rps: self.limiter_rps,
                burst: self.limiter_burst,
                idle_timeout: Duration::from_secs(self.limiter_idle_secs),
                sweep_interval: Duration::from_secs(self.limiter_sweep_secs),
                client_key: self.limiter_key,
            },
            auth: AuthConfig {
                validation_timeout: Duration::from_millis(self.auth_timeout_ms),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate()?;

    let tokens = MemoryTokenStore::new();
    if let Some(token) = &cli.seed_token {
        if !is_plaintext_token(token) {
            return Err(Error::Config("seed token must be 26 base32 characters".to_owned()));
        }
        let admin = User::new(1, "admin@greenlight.local")
            .with_permission("movies:read")
            .with_permission("movies:write");
        tokens.insert(token.clone(), admin, Duration::from_secs(24 * 60 * 60));
        info!("seed token registered for user 1");
    }

    let env: Arc<str> = Arc::from(cli.env.as_str());
    let router = api::routes(|endpoint| {
        let env = Arc::clone(&env);
        move |req: Request| resource(endpoint, Arc::clone(&env), req)
    });

    let app = Pipeline::standard(&config, router, Arc::new(tokens));
    info!(env = %env, limiter = ?config.limiter, "starting server");

    Server::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port)))
        .serve(app)
        .await
}

/// Stand-in for the resource handlers, which live outside this crate: the
/// health check is real, every other endpoint echoes what the pipeline
/// resolved for it.
async fn resource(endpoint: Endpoint, env: Arc<str>, req: Request) -> Response {
    match endpoint {
        Endpoint::Healthcheck => Response::serialize(StatusCode::OK, &json!({
            "status": "available",
            "system_info": {
                "environment": &*env,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        _ => Response::serialize(StatusCode::OK, &json!({
            "endpoint": endpoint.name(),
            "params": req.params(),
            "identity": req.identity(),
        })),
    }
}
