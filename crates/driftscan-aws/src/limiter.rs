use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Shared request limiter applied before every AWS API call, so one run
/// never exceeds the configured requests per second across services.
pub(crate) type ApiLimiter = Arc<DefaultDirectRateLimiter>;

pub(crate) fn new_limiter(api_rps: u32) -> ApiLimiter {
    let rps = NonZeroU32::new(api_rps.max(1)).expect("clamped to >= 1");
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}
