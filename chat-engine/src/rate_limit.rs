use std::num::NonZeroU32;

use governor::{
    clock::{Clock, DefaultClock},
    Quota, RateLimiter,
};

/// Advisory in-memory token bucket per caller. Bucket state is lost on
/// restart, which is acceptable for this limiter.
pub struct ChatRateLimiter {
    limiter: governor::DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl ChatRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute =
            NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);

        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            clock: DefaultClock::default(),
        }
    }

    /// Checks the bucket for a caller key (user id, falling back to client
    /// IP upstream). Over-limit returns the seconds to wait.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}
