// src/server/rate_limit.rs

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

pub const RL_MAX_REQUESTS: u32 = 100;
pub const RL_WINDOW: Duration = Duration::from_secs(15 * 60);

// tracked IPs before `check` drops stale windows
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    window_start: Instant,
    requests: u32,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            requests: 0,
        }
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.window_start) >= window
    }

    fn remaining_window_secs(&self, now: Instant, window: Duration) -> u64 {
        window
            .saturating_sub(now.duration_since(self.window_start))
            .as_secs()
            .max(1)
    }
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<IpAddr, RateLimitEntry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RL_MAX_REQUESTS, RL_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request from `ip`. `Err` carries the seconds until the
    /// window resets.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= PRUNE_THRESHOLD {
            self.prune(&mut entries, now);
        }

        let entry = entries.entry(ip).or_insert_with(|| RateLimitEntry::new(now));

        // reset window if expired
        if entry.is_stale(now, self.window) {
            *entry = RateLimitEntry::new(now);
        }

        if entry.requests >= self.max_requests {
            return Err(entry.remaining_window_secs(now, self.window));
        }

        entry.requests += 1;
        Ok(())
    }

    /// Drops every client whose window has run out.
    fn prune(&self, entries: &mut HashMap<IpAddr, RateLimitEntry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| !e.is_stale(now, self.window));
        debug!(
            "rate limiter pruned {} stale window(s), {} tracked",
            before - entries.len(),
            entries.len()
        );
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
