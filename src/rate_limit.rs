//! Per-caller rate limiting for `/api`.
//!
//! Callers are keyed by the `X-Benos-Actor` header when present, otherwise
//! by client IP (`X-Forwarded-For`, then the socket address). Every response
//! carries `X-RateLimit-Limit` and `X-RateLimit-Remaining`; an exhausted
//! caller gets 429 with `Retry-After` in whole seconds.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
};

use crate::api::ACTOR_HEADER;
use crate::config::RateLimitSection;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Keys kept before idle callers are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

type KeyedLimiter =
    RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

pub struct ApiRateLimiter {
    limiter: KeyedLimiter,
    clock: DefaultClock,
    burst: u32,
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("burst", &self.burst)
            .finish()
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            clock: DefaultClock::default(),
            burst: burst.get(),
        }
    }

    pub fn from_config(config: &RateLimitSection) -> Self {
        Self::new(config.requests_per_minute, config.burst)
    }

    pub fn limit(&self) -> u32 {
        self.burst
    }

    pub fn check(&self, key: &str) -> Decision {
        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }
        match self.limiter.check_key(&key.to_string()) {
            Ok(snapshot) => Decision::Allowed {
                remaining: snapshot.remaining_burst_capacity(),
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Decision::Limited {
                    // Round up so clients never retry early.
                    retry_after_secs: wait.as_secs() + u64::from(wait.subsec_nanos() > 0),
                }
            }
        }
    }
}

/// Identify the caller for rate limiting.
pub fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(actor) = header_value(ACTOR_HEADER) {
        return format!("actor:{}", actor);
    }
    if let Some(forwarded) = header_value("x-forwarded-for")
        && let Some(ip) = forwarded.split(',').next()
    {
        return format!("ip:{}", ip.trim());
    }
    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

/// Axum middleware enforcing the limiter.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<ApiRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let key = caller_key(req.headers(), peer);

    match limiter.check(&key) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(req).await;
            set_header(&mut response, LIMIT_HEADER, limiter.limit().into());
            set_header(&mut response, REMAINING_HEADER, remaining.into());
            response
        }
        Decision::Limited { retry_after_secs } => {
            tracing::warn!(caller = %key, retry_after_secs, "Rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Rate limit exceeded",
                    "retry_after": retry_after_secs,
                })),
            )
                .into_response();
            set_header(&mut response, LIMIT_HEADER, limiter.limit().into());
            set_header(&mut response, REMAINING_HEADER, 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
    }
}

fn set_header(response: &mut Response, name: &'static str, value: u64) {
    response
        .headers_mut()
        .insert(HeaderName::from_static(name), HeaderValue::from(value));
}
