// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-credential fixed-window request limiter.
//!
//! Best-effort and process-local: counters live in memory and reset with the
//! process.

use crate::LedgerError;
use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Counter state of one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub started: Instant,
    pub count: u32,
}

/// Storage for window counters.
///
/// `increment` must be atomic per key: concurrent callers for the same key
/// each observe a distinct count.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str, now: Instant, window: Duration) -> u32;
}

/// Number of tracked keys above which elapsed windows are evicted.
const EVICTION_THRESHOLD: usize = 10_000;

#[derive(Debug)]
pub struct InMemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
    eviction_threshold: usize,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_eviction_threshold(EVICTION_THRESHOLD)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eviction_threshold(eviction_threshold: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            eviction_threshold,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(&self, key: &str, now: Instant, window: Duration) -> u32 {
        let mut windows = self.windows.lock();
        if windows.len() >= self.eviction_threshold && !windows.contains_key(key) {
            windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }
        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count
    }
}

#[derive(Clone)]
pub struct RateGuard {
    counters: Arc<dyn CounterStore>,
    max_requests: u32,
    window: Duration,
}

impl RateGuard {
    pub fn new(counters: Arc<dyn CounterStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            counters,
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Arc::new(InMemoryCounterStore::new()),
            config.max_requests,
            config.window(),
        )
    }

    pub fn check(&self, key: &str) -> Result<(), LedgerError> {
        self.check_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RateLimited`] once the window's count exceeds the cap.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), LedgerError> {
        let count = self.counters.increment(key, now, self.window);
        if count > self.max_requests {
            warn!(key, count, limit = self.max_requests, "rate limit exceeded");
            return Err(LedgerError::RateLimited);
        }
        Ok(())
    }
}
