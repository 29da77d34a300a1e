//! Tunables for the page cache and its lock-acquisition retry loop.

use std::time::Duration;

use rand::Rng;

/// Bytes per page, header included. Every page on disk and in memory is exactly this size.
pub const PAGE_SIZE: usize = 4096;

/// Number of pages cached when no capacity is given.
pub const DEFAULT_PAGES: usize = 50;

/// Bounded retry policy used by [`crate::PageCache::get_page`] while a lock is unavailable.
///
/// The wait before each retry is `rand(1..=rand_range) * block_delay + rand(0..2 * block_delay)`,
/// so two transactions contending on the same page rarely retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub block_delay: Duration,
    pub rand_range: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, block_delay: Duration, rand_range: u32) -> Self {
        Self {
            max_attempts,
            block_delay,
            rand_range: rand_range.max(1),
        }
    }

    /// Draw the next randomized wait interval
    pub fn backoff<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let delay_ms = self.block_delay.as_millis() as u64;
        let multiplier = rng.random_range(1..=u64::from(self.range()));
        let jitter = if delay_ms == 0 {
            0
        } else {
            rng.random_range(0..2 * delay_ms)
        };
        Duration::from_millis(multiplier * delay_ms + jitter)
    }

    /// Upper bound on a single backoff interval
    pub fn max_backoff(&self) -> Duration {
        self.block_delay * (self.range() + 2)
    }

    //  the fields are public, so a literal may carry a zero range
    fn range(&self) -> u32 {
        self.rand_range.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50), 10)
    }
}

/// Configuration for a [`crate::PageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCacheConfig {
    pub capacity: usize,
    pub retry: RetryPolicy,
}

impl PageCacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PAGES,
            retry: RetryPolicy::default(),
        }
    }
}
