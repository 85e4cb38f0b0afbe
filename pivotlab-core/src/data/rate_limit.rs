//! Request spacing for the upstream provider.
//!
//! Each `acquire` reserves the next free slot and sleeps until it arrives, so
//! however many prefetch workers share one limiter the upstream sees at most
//! one request per `min_spacing`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Reserve a slot and return how long the caller must wait for it.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.min_spacing);
        slot.saturating_duration_since(now)
    }

    /// Block until the caller's slot arrives.
    pub fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[test]
    fn back_to_back_requests_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        limiter.reserve();
        let second = limiter.reserve();
        let third = limiter.reserve();
        assert!(second > Duration::from_secs(4));
        assert!(third > Duration::from_secs(9));
    }

    #[test]
    fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..10 {
            assert_eq!(limiter.reserve(), Duration::ZERO);
        }
    }
}
