//! Sliding-window call accounting keyed by endpoint category.
//!
//! A [`SlidingWindow`] remembers the instants of the calls made during the
//! last `window`.  A call is admitted while fewer than `max_calls` are
//! remembered; otherwise the caller is told how long until the oldest one
//! falls out of the window.
//!
//! [`RateLimiter`] holds one window per category.  It is a plain struct: the
//! relay wraps it in a single mutex so that every connection sharing a
//! category sees one consistent window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Returned when a category has no free slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limit exceeded for '{category}': {max_calls} calls per {window:?}, retry in {retry_after:?}")]
pub struct RateLimitExceeded {
    pub category: String,
    pub max_calls: usize,
    pub window: Duration,
    /// Time until the oldest recorded call leaves the window.
    pub retry_after: Duration,
}

/// Call instants for one category.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    max_calls: usize,
    calls: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls,
            calls: VecDeque::with_capacity(max_calls),
        }
    }

    /// Drops every call older than `window` relative to `now`.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records a call at `now` if a slot is free.
    ///
    /// Returns `Err(wait)` with the time until a slot frees up otherwise.
    pub fn try_record(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);
        if self.calls.len() < self.max_calls {
            self.calls.push_back(now);
            return Ok(());
        }
        let oldest = self.calls.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Forgets the most recently recorded call.
    pub fn release(&mut self) {
        self.calls.pop_back();
    }

    /// Calls currently inside the window.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.calls.len()
    }
}

/// Per-category sliding windows sharing one configuration.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_calls: usize,
    windows: HashMap<String, SlidingWindow>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_calls` per `window` in every category.
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls,
            windows: HashMap::new(),
        }
    }

    /// Admits one call in `category` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] carrying the time until a slot frees.
    pub fn try_acquire(&mut self, category: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        let (window, max_calls) = (self.window, self.max_calls);
        self.windows
            .entry(category.to_string())
            .or_insert_with(|| SlidingWindow::new(window, max_calls))
            .try_record(now)
            .map_err(|retry_after| RateLimitExceeded {
                category: category.to_string(),
                max_calls,
                window,
                retry_after,
            })
    }

    /// Returns the slot of the latest call in `category`, for a call that
    /// was admitted but never made.
    pub fn release(&mut self, category: &str) {
        if let Some(window) = self.windows.get_mut(category) {
            window.release();
        }
    }

    /// Calls recorded in `category` during the current window.
    pub fn count(&mut self, category: &str, now: Instant) -> usize {
        self.windows
            .get_mut(category)
            .map(|w| w.count(now))
            .unwrap_or(0)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixth_call_in_same_second_is_rejected_then_succeeds_after_window() {
        // Arrange: maxCalls = 5, window = 1s
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 5);
        let t0 = Instant::now();

        // Act: five calls spread over the first 400ms
        for i in 0..5 {
            limiter
                .try_acquire("console.send", t0 + Duration::from_millis(i * 100))
                .expect("within budget");
        }
        let sixth = limiter.try_acquire("console.send", t0 + Duration::from_millis(500));
        let after_window = limiter.try_acquire("console.send", t0 + Duration::from_millis(1_000));

        // Assert
        let err = sixth.unwrap_err();
        assert_eq!(err.retry_after, Duration::from_millis(500));
        assert!(after_window.is_ok());
    }

    #[test]
    fn test_categories_are_independent() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let now = Instant::now();
        assert!(limiter.try_acquire("a", now).is_ok());
        assert!(limiter.try_acquire("b", now).is_ok());
        assert!(limiter.try_acquire("a", now).is_err());
    }

    #[test]
    fn test_rejected_call_is_not_recorded() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let t0 = Instant::now();
        limiter.try_acquire("a", t0).unwrap();
        let _ = limiter.try_acquire("a", t0 + Duration::from_millis(900));

        assert_eq!(limiter.count("a", t0 + Duration::from_millis(900)), 1);
        assert!(limiter.try_acquire("a", t0 + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_released_slot_can_be_taken_again() {
        // Arrange
        let mut limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        limiter.try_acquire("a", now).unwrap();

        // Act
        limiter.release("a");
        limiter.release("a");
        limiter.release("unknown");

        // Assert
        assert_eq!(limiter.count("a", now), 0);
        assert!(limiter.try_acquire("a", now).is_ok());
        assert!(limiter.try_acquire("a", now).is_err());
    }

    #[test]
    fn test_count_of_unknown_category_is_zero() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 3);
        assert_eq!(limiter.count("nothing", Instant::now()), 0);
    }

    #[test]
    fn test_error_message_names_category() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 0);
        let err = limiter.try_acquire("console.send", Instant::now()).unwrap_err();
        assert!(err.to_string().contains("console.send"));
    }
}
