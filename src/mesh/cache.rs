//! Time-bounded cache for a registry listing.

use std::time::{Duration, Instant};

/// How long a registry listing stays fresh.
pub const LISTING_TTL: Duration = Duration::from_secs(60);

/// A cached value with the instant it was fetched.
///
/// Owned by whoever issues the registry calls; mutating calls must
/// [`invalidate`](Self::invalidate) it.
#[derive(Clone, Debug)]
pub struct ListingCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T> Default for ListingCache<T> {
    fn default() -> Self {
        Self::new(LISTING_TTL)
    }
}

impl<T> ListingCache<T> {
    /// Empty cache with the given time-to-live.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// Returns the cached value while it is younger than the time-to-live.
    #[must_use]
    pub fn fresh(&self) -> Option<&T> {
        self.fresh_at(Instant::now())
    }

    fn fresh_at(&self, now: Instant) -> Option<&T> {
        self.entry
            .as_ref()
            .filter(|(_, fetched_at)| now.saturating_duration_since(*fetched_at) < self.ttl)
            .map(|(value, _)| value)
    }

    /// Stores a freshly fetched value and returns a reference to it.
    pub fn store(&mut self, value: T) -> &T {
        let (stored, _) = self.entry.insert((value, Instant::now()));
        stored
    }

    /// Drops the cached value.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
