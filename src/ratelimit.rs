//! Throttling for repeated diagnostics.

use crate::time::Usec;

/// Outcome of [`RateLimit::test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    /// Below the limit; the message should be emitted.
    Pass,
    /// This is the last message allowed in the current window.
    ///
    /// The message should be emitted, followed by a note that further ones will be discarded.
    Threshold,
    /// The limit has been reached; the message should be dropped.
    Exceeded,
}

/// Allows at most `burst` events per `interval`.
#[derive(Debug, Clone)]
pub struct RateLimit {
    interval: Usec,
    begin: Usec,
    burst: u32,
    num: u32,
}

impl RateLimit {
    pub const fn new(interval: Usec, burst: u32) -> Self {
        Self {
            interval,
            begin: Usec::ZERO,
            burst,
            num: 0,
        }
    }

    pub fn interval(&self) -> Usec {
        self.interval
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Records one event happening at `now`.
    pub fn test(&mut self, now: Usec) -> RateLimitState {
        if self.interval.is_zero() || self.burst == 0 {
            return RateLimitState::Pass;
        }

        if self.begin.is_zero() || self.begin + self.interval < now {
            // First event, or the previous window has elapsed.
            self.begin = now;
            self.num = 1;
            if self.burst == 1 {
                return RateLimitState::Threshold;
            }
            RateLimitState::Pass
        } else if self.num < self.burst {
            self.num += 1;
            if self.num == self.burst {
                RateLimitState::Threshold
            } else {
                RateLimitState::Pass
            }
        } else {
            RateLimitState::Exceeded
        }
    }
}

/// Logs a message at `error` level, unless `$limit` says to drop it.
macro_rules! log_ratelimit {
    ($limit:expr, $now:expr, $($arg:tt)+) => {
        match $limit.test($now) {
            $crate::ratelimit::RateLimitState::Pass => log::error!($($arg)+),
            $crate::ratelimit::RateLimitState::Threshold => {
                log::error!($($arg)+);
                log::error!(
                    "WARNING: log rate limit exceeded ({} msgs per {}). Discarding future messages.",
                    $limit.burst(),
                    $limit.interval().human(),
                );
            }
            $crate::ratelimit::RateLimitState::Exceeded => {}
        }
    };
}
