//! Pipeline configuration.
//!
//! Everything the middleware layers need is passed in explicitly through
//! [`Config`] when the pipeline is built. There is no process-wide mutable
//! state, so tests can build as many isolated pipelines as they like.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub limiter: RateLimitConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Rejects settings that would make a layer misbehave at runtime.
    pub fn validate(&self) -> Result<(), Error> {
        self.limiter.validate()?;
        self.auth.validate()
    }
}

/// Where the rate limiter reads the client identity from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientKey {
    /// The TCP peer address. Correct when clients connect directly.
    #[default]
    PeerAddr,
    /// The first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
    /// Only safe behind a proxy that overwrites these headers.
    Forwarded,
}

impl FromStr for ClientKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer" => Ok(Self::PeerAddr),
            "forwarded" => Ok(Self::Forwarded),
            other => Err(format!("unknown client key `{other}` (expected `peer` or `forwarded`)")),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerAddr => "peer",
            Self::Forwarded => "forwarded",
        })
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Sustained requests per second per client.
    pub rps: f64,
    /// Bucket capacity: requests a client may send in one burst.
    pub burst: u32,
    /// A bucket untouched for this long is dropped by the sweeper.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub client_key: ClientKey,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
            client_key: ClientKey::PeerAddr,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if !self.rps.is_finite() || self.rps <= 0.0 {
            return Err(Error::Config(format!("limiter rps must be positive, got {}", self.rps)));
        }
        if self.burst == 0 {
            return Err(Error::Config("limiter burst must be at least 1".to_owned()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("limiter sweep interval must be non-zero".to_owned()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Upper bound on a single token validation call.
    pub validation_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { validation_timeout: Duration::from_secs(2) }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.validation_timeout.is_zero() {
            return Err(Error::Config("auth validation timeout must be non-zero".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_rate() {
        for rps in [0.0, -1.0, f64::NAN] {
            let mut config = Config::default();
            config.limiter.rps = rps;
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn disabled_limiter_skips_checks() {
        let mut config = Config::default();
        config.limiter.enabled = false;
        config.limiter.burst = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_auth_timeout() {
        let mut config = Config::default();
        config.auth.validation_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_key_parses() {
        assert_eq!("peer".parse::<ClientKey>(), Ok(ClientKey::PeerAddr));
        assert_eq!("forwarded".parse::<ClientKey>(), Ok(ClientKey::Forwarded));
        assert!("header".parse::<ClientKey>().is_err());
    }
}
