//! Per-client request throttling.
//!
//! Each client address owns a token bucket refilled at `per_sec` up to
//! `burst`. A rejected request learns how long until the next token.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub per_sec: f64,
    pub burst: f64,
}

#[derive(Debug)]
struct Bucket {
    allowance: f64,
    checked_at: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    quota: Quota,
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
}

impl RateLimiter {
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take one token for `client`, or report how long to wait for one.
    pub async fn admit(&self, client: IpAddr) -> Result<(), Duration> {
        self.admit_at(client, Instant::now()).await
    }

    async fn admit_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let Quota { per_sec, burst } = self.quota;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(client).or_insert(Bucket {
            allowance: burst,
            checked_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.checked_at).as_secs_f64();
        bucket.allowance = (bucket.allowance + elapsed * per_sec).min(burst);
        bucket.checked_at = now;

        if bucket.allowance >= 1.0 {
            bucket.allowance -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.allowance) / per_sec))
        }
    }

    /// Drop buckets that have been idle for at least `idle`.
    pub async fn forget_idle(&self, idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| now.saturating_duration_since(bucket.checked_at) < idle);
    }
}

pub async fn throttle(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    if let Some(client) = client_addr(&req) {
        if let Err(wait) = limiter.admit(client).await {
            tracing::warn!(client = %client, "rate limit exceeded");
            return ServerError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
            .into_response();
        }
    }
    next.run(req).await
}

/// Peer address from the connection, else the first `X-Forwarded-For` hop.
fn client_addr(req: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(addr.ip());
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
}
