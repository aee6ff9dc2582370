/// Request rate limiting
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{AppError, AppResult},
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    limit: u32,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let auth_quota =
            Quota::per_second(non_zero(config.authenticated_rps)).allow_burst(non_zero(config.burst_size));

        let unauth_quota = Quota::per_second(non_zero(config.unauthenticated_rps))
            .allow_burst(non_zero(config.burst_size / 5));

        Self {
            enabled: config.enabled,
            limit: config.authenticated_rps,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    fn check(&self, limiter: &DirectLimiter) -> AppResult<()> {
        if !self.enabled {
            return Ok(());
        }
        limiter.check().map_err(|_| AppError::RateLimitExceeded {
            retry_after: std::time::Duration::from_secs(1),
        })
    }

    /// Check rate limit for a caller presenting a bearer token
    pub fn check_authenticated(&self) -> AppResult<()> {
        self.check(&self.authenticated)
    }

    /// Check rate limit for anonymous callers (webhooks, health)
    pub fn check_unauthenticated(&self) -> AppResult<()> {
        self.check(&self.unauthenticated)
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(State(ctx): State<AppContext>, request: Request, next: Next) -> Response {
    let has_auth_header = request.headers().contains_key(header::AUTHORIZATION);

    let result = if has_auth_header {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    match result {
        Ok(()) => {
            let mut response = next.run(request).await;
            if ctx.rate_limiter.enabled {
                response
                    .headers_mut()
                    .insert("X-RateLimit-Limit", HeaderValue::from(ctx.rate_limiter.limit));
            }
            response
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "Rate limit exceeded");
            e.into_response()
        }
    }
}
