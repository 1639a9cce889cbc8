//! Per-source connection rate limiting.
//!
//! A fixed window per IP address: the first attempt opens a window, attempts are counted until
//! the threshold is reached, and the count starts over once the window has elapsed. State lives
//! in memory only.
//!
//! A poisoned lock is recovered rather than propagated; the table only holds counters, so the
//! worst case after a panic elsewhere is a slightly off count.

use log::debug;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Most source addresses tracked at once.
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

/// Share of the table dropped, oldest windows first, when it is full of live entries.
const EVICTION_DIVISOR: usize = 10;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    start: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    per_window: u32,
    window: Duration,
    max_tracked: usize,
    windows: Mutex<HashMap<IpAddr, RateWindow>>,
}

impl RateLimiter {
    /// Limiter admitting `per_minute` attempts per source IP. `0` disables limiting.
    pub fn new(per_minute: u32) -> Self {
        Self::with_window(per_minute, WINDOW, DEFAULT_MAX_TRACKED)
    }

    pub fn with_window(per_window: u32, window: Duration, max_tracked: usize) -> Self {
        Self {
            per_window,
            window,
            max_tracked,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.per_window > 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, RateWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes room for one more entry. Expired windows go first; if the table is still full,
    /// the oldest tenth of the live windows is dropped so the next inserts do not rescan.
    fn make_room(&self, windows: &mut HashMap<IpAddr, RateWindow>, now: Instant) {
        windows.retain(|_, w| now.saturating_duration_since(w.start) < self.window);
        if windows.len() < self.max_tracked {
            return;
        }

        let evict = (windows.len() / EVICTION_DIVISOR).max(1);
        let mut by_age: Vec<(Instant, IpAddr)> =
            windows.iter().map(|(ip, w)| (w.start, *ip)).collect();
        by_age.select_nth_unstable(evict - 1);
        for (_, ip) in &by_age[..evict] {
            windows.remove(ip);
        }
        debug!(
            "Rate limit table full, evicted {} live entries ({} tracked)",
            evict,
            windows.len()
        );
    }

    /// Records an attempt from `ip` at `now` and tells whether it is admitted.
    ///
    /// Rejected attempts are not counted.
    pub fn admit(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut windows = self.lock();

        if windows.len() >= self.max_tracked && !windows.contains_key(&ip) {
            self.make_room(&mut windows, now);
        }

        let entry = windows.entry(ip).or_insert(RateWindow {
            count: 0,
            start: now,
        });

        if now.saturating_duration_since(entry.start) >= self.window {
            entry.start = now;
            entry.count = 0;
        }

        if entry.count >= self.per_window {
            debug!("Rate limit reached for {} ({} attempts)", ip, entry.count);
            return false;
        }

        entry.count += 1;
        true
    }

    /// Drops entries whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.start) < self.window);
        before - windows.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    /// Interval at which a sweep task should call [`RateLimiter::purge_expired`].
    pub fn sweep_interval(&self) -> Duration {
        self.window
    }
}
