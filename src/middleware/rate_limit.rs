//! Per-client token-bucket admission control.
//!
//! Each client (keyed by IP address) owns a bucket that holds up to `burst`
//! tokens and refills at `rps` tokens per second. A request spends one token;
//! an empty bucket means `429 Too Many Requests` and the rest of the pipeline
//! never runs. This layer sits in front of authentication so abusive traffic
//! is turned away before any token lookup is paid for.
//!
//! # Concurrency
//!
//! Buckets live in a [`DashMap`]; each bucket has its own mutex. A check takes
//! the map shard's read lock and then the bucket lock, so requests from
//! different clients in the same shard proceed in parallel. The sweeper evicts
//! through [`DashMap::retain`], which holds the shard's write lock: it can
//! never observe a bucket that a check is refilling.

use std::future::ready;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::{ClientKey, RateLimitConfig};
use crate::error::ApiError;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::IntoResponse;

/// Outcome of one admission check.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Allowed {
        /// Whole tokens left after this request.
        remaining: u32,
    },
    Denied {
        /// Time until the next token is available.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self { tokens: burst, last_refill: now }
    }

    fn take(&mut self, now: Instant, rate: f64, burst: f64) -> Decision {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Allowed { remaining: self.tokens.floor() as u32 }
        } else {
            // A vanishing or non-positive rate means the wait does not fit a
            // `Duration`; report the longest one instead.
            let wait = (1.0 - self.tokens) / rate;
            Decision::Denied { retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX) }
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Shared limiter state: one bucket per client seen recently.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<IpAddr, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of buckets currently held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Derives the client identity for `req` according to the configured
    /// [`ClientKey`].
    pub fn client_key(&self, req: &Request) -> IpAddr {
        let peer = req.remote_addr().ip();
        match self.config.client_key {
            ClientKey::PeerAddr => peer,
            ClientKey::Forwarded => req.header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .and_then(parse_ip)
                .or_else(|| req.header("x-real-ip").and_then(parse_ip))
                .unwrap_or(peer),
        }
    }

    /// Refills `client`'s bucket and tries to spend one token, creating the
    /// bucket (full) on first sight.
    pub fn check(&self, client: IpAddr) -> Decision {
        let now = Instant::now();
        let rate = self.config.rps;
        let burst = f64::from(self.config.burst);

        if let Some(bucket) = self.buckets.get(&client) {
            return lock(&bucket).take(now, rate, burst);
        }
        let bucket = self.buckets
            .entry(client)
            .or_insert_with(|| Mutex::new(Bucket::full(burst, now)));
        lock(&bucket).take(now, rate, burst)
    }

    /// Drops every bucket idle for at least the configured timeout and
    /// returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
            let keep = bucket.idle_for(now) < idle_timeout;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Runs [`RateLimiter::sweep`] every `sweep_interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.len(), "evicted idle rate-limit buckets");
                }
            }
        })
    }
}

fn lock(bucket: &Mutex<Bucket>) -> MutexGuard<'_, Bucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    value.parse::<IpAddr>().ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// The rate-limiting layer.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_limiter(Arc::new(RateLimiter::new(config)))
    }

    /// Uses an existing limiter, e.g. to inspect its state from tests.
    pub fn with_limiter(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Middleware for RateLimit {
    fn name(&self) -> &'static str { "rate_limit" }

    fn call(&self, req: Request, next: Next) -> BoxFuture {
        if !self.limiter.config.enabled {
            return next.run(req);
        }

        let client = self.limiter.client_key(&req);
        match self.limiter.check(client) {
            Decision::Allowed { .. } => next.run(req),
            Decision::Denied { retry_after } => {
                warn!(%client, path = req.path(), ?retry_after, "rate limit exceeded");
                Box::pin(ready(ApiError::RateLimitExceeded { retry_after }.into_response()))
            }
        }
    }

    fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        self.limiter.config.enabled.then(|| self.limiter.spawn_sweeper())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::middleware::Pipeline;
    use crate::response::Response;

    fn config(rps: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig { rps, burst, ..RateLimitConfig::default() }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn request_from(peer: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/v1/movies");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        Request::new(builder.body(Bytes::new()).unwrap(), peer.parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let limiter = RateLimiter::new(config(2.0, 4));
        let client = ip("203.0.113.9");

        for remaining in (0..4).rev() {
            assert_eq!(limiter.check(client), Decision::Allowed { remaining });
        }
        assert_eq!(
            limiter.check(client),
            Decision::Denied { retry_after: Duration::from_millis(500) }
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check(client).is_allowed());
        assert!(!limiter.check(client).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_denies_with_longest_wait() {
        let limiter = RateLimiter::new(config(1e-20, 1));
        let client = ip("203.0.113.9");
        assert!(limiter.check(client).is_allowed());
        assert_eq!(limiter.check(client), Decision::Denied { retry_after: Duration::MAX });

        let stalled = RateLimiter::new(config(0.0, 1));
        assert!(stalled.check(client).is_allowed());
        assert_eq!(stalled.check(client), Decision::Denied { retry_after: Duration::MAX });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_admit_exactly_burst() {
        let limiter = Arc::new(RateLimiter::new(config(0.001, 10)));
        let client = ip("203.0.113.9");

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check(client).is_allowed() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(config(2.0, 4));
        let client = ip("203.0.113.9");
        limiter.check(client);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(limiter.check(client), Decision::Allowed { remaining: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn clients_have_independent_buckets() {
        let limiter = RateLimiter::new(config(1.0, 1));
        assert!(limiter.check(ip("10.0.0.1")).is_allowed());
        assert!(!limiter.check(ip("10.0.0.1")).is_allowed());
        assert!(limiter.check(ip("10.0.0.2")).is_allowed());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn peer_key_ignores_forwarding_headers() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let req = request_from("192.0.2.1:5000", &[("x-forwarded-for", "198.51.100.7")]);
        assert_eq!(limiter.client_key(&req), ip("192.0.2.1"));
    }

    #[test]
    fn forwarded_key_prefers_first_hop() {
        let limiter = RateLimiter::new(RateLimitConfig {
            client_key: ClientKey::Forwarded,
            ..RateLimitConfig::default()
        });

        let req = request_from("192.0.2.1:5000", &[("x-forwarded-for", "198.51.100.7, 10.0.0.1")]);
        assert_eq!(limiter.client_key(&req), ip("198.51.100.7"));

        let req = request_from("192.0.2.1:5000", &[("x-real-ip", "198.51.100.8:443")]);
        assert_eq!(limiter.client_key(&req), ip("198.51.100.8"));

        let req = request_from("192.0.2.1:5000", &[("x-forwarded-for", "garbage")]);
        assert_eq!(limiter.client_key(&req), ip("192.0.2.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            idle_timeout: Duration::from_secs(180),
            ..RateLimitConfig::default()
        });
        for i in 0..1000u32 {
            limiter.check(IpAddr::from(i.to_be_bytes()));
        }
        let regular = ip("0.0.0.7");

        tokio::time::advance(Duration::from_secs(100)).await;
        limiter.check(regular);
        tokio::time::advance(Duration::from_secs(90)).await;

        assert_eq!(limiter.sweep(), 999);
        assert_eq!(limiter.len(), 1);
        assert!(limiter.buckets.contains_key(&regular));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_in_background() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
            ..RateLimitConfig::default()
        }));
        for i in 0..50u32 {
            limiter.check(IpAddr::from(i.to_be_bytes()));
        }
        let sweeper = limiter.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(limiter.len(), 50);

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert!(limiter.is_empty());
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn layer_rejects_without_running_downstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::over(move |_req: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Response::text("ok") }
        })
        .layer(RateLimit::new(config(2.0, 4)))
        .build();

        for _ in 0..4 {
            let response = pipeline.handle(request_from("192.0.2.1:5000", &[])).await;
            assert_eq!(response.status_code(), StatusCode::OK);
        }
        let response = pipeline.handle(request_from("192.0.2.1:5000", &[])).await;
        assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("retry-after"), Some("1"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unrefillable_bucket_still_answers_429() {
        let pipeline = Pipeline::over(|_req: Request| async { "ok" })
            .layer(RateLimit::new(config(1e-20, 1)))
            .build();

        let response = pipeline.handle(request_from("192.0.2.1:5000", &[])).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let response = pipeline.handle(request_from("192.0.2.1:5000", &[])).await;
        assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.header("retry-after").is_some());
    }

    #[tokio::test]
    async fn disabled_layer_admits_everything() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: false,
            burst: 1,
            ..RateLimitConfig::default()
        }));
        let layer = RateLimit::with_limiter(Arc::clone(&limiter));
        assert!(layer.spawn_maintenance().is_none());

        let pipeline = Pipeline::over(|_req: Request| async { "ok" }).layer(layer).build();
        for _ in 0..10 {
            let response = pipeline.handle(request_from("192.0.2.1:5000", &[])).await;
            assert_eq!(response.status_code(), StatusCode::OK);
        }
        assert!(limiter.is_empty());
    }
}
