//! Per-provider call spacing.
//!
//! One [`RateLimiter`] belongs to one provider client. Callers queue on the
//! limiter's lock, so calls to the same provider go out one interval apart
//! while calls to other providers are unaffected.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Enforces a minimum interval between consecutive calls to one provider.
#[derive(Debug)]
pub struct RateLimiter {
    provider: &'static str,
    min_interval: Duration,
    /// Earliest instant the next call may start.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(provider: &'static str, min_interval: Duration) -> Self {
        Self {
            provider,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited(provider: &'static str) -> Self {
        Self::new(provider, Duration::ZERO)
    }

    /// Wait for this provider's next free slot and claim it.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        // Held across the sleep: later callers queue behind this one.
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            let now = Instant::now();
            if at > now {
                trace!(provider = self.provider, wait_ms = (at - now).as_millis() as u64, "rate limited");
                tokio::time::sleep_until(at).await;
            }
        }
        *next_slot = Some(Instant::now() + self.min_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn spaces_calls_to_one_provider() {
        let limiter = RateLimiter::new("serper", Duration::from_millis(40));
        let start = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // First call is free, the next two each wait one interval.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn providers_do_not_block_each_other() {
        let slow = Arc::new(RateLimiter::new("gemini", Duration::from_millis(500)));
        let fast = Arc::new(RateLimiter::unlimited("places"));

        slow.acquire().await;
        let blocked = {
            let slow = slow.clone();
            tokio::spawn(async move { slow.acquire().await })
        };

        let start = std::time::Instant::now();
        for _ in 0..5 {
            fast.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(250));
        blocked.await.expect("join");
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new("serper", Duration::from_millis(30)));
        let start = std::time::Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join");
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
