//! Async front-end of the sliding-window limiter.
//!
//! One [`SharedRateLimiter`] is shared by every connection.  The window check
//! and the call record happen under a single `std::sync::Mutex`, so two
//! connections can never both take the last slot.  The lock is never held
//! across an `.await`; blocking callers sleep outside it and retry.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use console_core::{RateLimitExceeded, RateLimiter};

use crate::domain::RateLimitMode;

/// Category used for outbound console commands.
pub const CONSOLE_SEND: &str = "console.send";

/// Smallest pause between two retries of a blocked caller.
const MIN_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct SharedRateLimiter {
    inner: Mutex<RateLimiter>,
    mode: RateLimitMode,
}

impl SharedRateLimiter {
    pub fn new(window: Duration, max_calls: usize, mode: RateLimitMode) -> Self {
        Self {
            inner: Mutex::new(RateLimiter::new(window, max_calls)),
            mode,
        }
    }

    pub fn mode(&self) -> RateLimitMode {
        self.mode
    }

    /// Takes one slot in `category` without waiting.
    pub fn try_acquire(&self, category: &str) -> Result<(), RateLimitExceeded> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(category, Instant::now())
    }

    /// Takes one slot in `category`.
    ///
    /// In [`RateLimitMode::Block`] this waits until a slot frees up; in
    /// [`RateLimitMode::Reject`] it fails straight away.  A limiter with a
    /// budget of zero calls fails straight away in both modes.
    ///
    /// # Errors
    ///
    /// [`RateLimitExceeded`] in reject mode when the window is full, or when
    /// the budget is zero.
    pub async fn acquire(&self, category: &str) -> Result<(), RateLimitExceeded> {
        loop {
            match self.try_acquire(category) {
                Ok(()) => return Ok(()),
                Err(e) if self.mode == RateLimitMode::Reject || e.max_calls == 0 => return Err(e),
                Err(e) => {
                    debug!(category, retry_after = ?e.retry_after, "rate limit reached; waiting");
                    tokio::time::sleep(e.retry_after.max(MIN_RETRY)).await;
                }
            }
        }
    }

    /// Gives back the latest slot taken in `category`.
    pub fn release(&self, category: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(category);
    }

    /// Calls recorded in `category` during the current window.
    pub fn stats(&self, category: &str) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count(category, Instant::now())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_reject_mode_fails_when_window_is_full() {
        // Arrange
        let limiter = SharedRateLimiter::new(Duration::from_secs(60), 2, RateLimitMode::Reject);

        // Act
        limiter.acquire(CONSOLE_SEND).await.unwrap();
        limiter.acquire(CONSOLE_SEND).await.unwrap();
        let third = limiter.acquire(CONSOLE_SEND).await;

        // Assert
        let err = third.unwrap_err();
        assert_eq!(err.category, CONSOLE_SEND);
        assert!(err.retry_after > Duration::ZERO);
        assert_eq!(limiter.stats(CONSOLE_SEND), 2);
    }

    #[tokio::test]
    async fn test_block_mode_waits_for_a_slot() {
        let limiter = SharedRateLimiter::new(Duration::from_millis(100), 1, RateLimitMode::Block);
        let started = Instant::now();

        limiter.acquire(CONSOLE_SEND).await.unwrap();
        limiter.acquire(CONSOLE_SEND).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_zero_budget_fails_instead_of_blocking() {
        // Arrange
        let limiter = SharedRateLimiter::new(Duration::from_secs(1), 0, RateLimitMode::Block);

        // Act
        let result = tokio::time::timeout(Duration::from_secs(2), limiter.acquire(CONSOLE_SEND)).await;

        // Assert
        let err = result.expect("acquire must not block").unwrap_err();
        assert_eq!(err.max_calls, 0);
        assert_eq!(limiter.stats(CONSOLE_SEND), 0);
    }

    #[tokio::test]
    async fn test_released_slot_is_reusable() {
        let limiter = SharedRateLimiter::new(Duration::from_secs(60), 1, RateLimitMode::Reject);

        limiter.acquire(CONSOLE_SEND).await.unwrap();
        limiter.release(CONSOLE_SEND);

        assert!(limiter.acquire(CONSOLE_SEND).await.is_ok());
        assert!(limiter.acquire(CONSOLE_SEND).await.is_err());
    }

    #[tokio::test]
    async fn test_window_is_shared_between_tasks() {
        let limiter = Arc::new(SharedRateLimiter::new(
            Duration::from_secs(60),
            3,
            RateLimitMode::Reject,
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire(CONSOLE_SEND).await.is_ok() }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
    }
}
