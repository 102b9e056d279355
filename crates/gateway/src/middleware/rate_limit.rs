//! Rate limiting middleware using token bucket algorithm

use axum::{extract::Request, middleware::Next, response::Response};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use revforge_common::config::RateLimitConfig;
use revforge_common::errors::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Gateway-wide limiter; `None` when rate limiting is disabled in
/// configuration
pub type GatewayLimiter = Option<Arc<DefaultDirectRateLimiter>>;

/// Build the gateway limiter from configuration
pub fn build_limiter(config: &RateLimitConfig) -> GatewayLimiter {
    if !config.enabled {
        return None;
    }

    let quota = Quota::per_second(NonZeroU32::new(config.requests_per_second.max(1)).unwrap())
        .allow_burst(NonZeroU32::new(config.burst.max(1)).unwrap());

    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Rate limiting middleware; rejections reuse the structured error body
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: GatewayLimiter,
) -> Result<Response, AppError> {
    if let Some(limiter) = limiter {
        if limiter.check().is_err() {
            tracing::warn!("Rate limit exceeded");
            return Err(AppError::RateLimited { limit: 0 });
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_within_quota() {
        let config = RateLimitConfig {
            requests_per_second: 100,
            burst: 200,
            enabled: true,
        };
        let limiter = build_limiter(&config).unwrap();
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_disabled_config_builds_no_limiter() {
        let config = RateLimitConfig {
            requests_per_second: 100,
            burst: 200,
            enabled: false,
        };
        assert!(build_limiter(&config).is_none());
    }
}
