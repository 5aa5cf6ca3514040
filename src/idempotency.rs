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

//! Replay protection for client-initiated mutating requests.
//!
//! A request carrying an idempotency token is fingerprinted by
//! `sha256(caller, path, token)`. The first successful (2xx) response for a
//! fingerprint is stored for a fixed TTL; retries within the TTL get the
//! stored status and body back and never reach the ledger.
//!
//! Expired records are dropped lazily when read, and swept in bulk by a
//! background thread that is woken after every successful store.

use crate::LedgerError;
use crate::base::UserId;
use chrono::{DateTime, Duration, Utc};
use crossbeam::channel::{self, Sender, TrySendError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

/// Hex-encoded SHA-256 of `(caller, path, token)`.
pub type Fingerprint = String;

pub fn fingerprint(caller: &UserId, path: &str, token: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in [caller.as_str(), path, token] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub fingerprint: Fingerprint,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Backing storage for idempotency records.
pub trait IdempotencyStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> Result<Option<IdempotencyRecord>, LedgerError>;

    /// Stores `record` unless one already exists. Returns whether it was stored.
    fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<bool, LedgerError>;

    /// Deletes the record under `fingerprint` only if it is expired at `now`.
    /// Returns whether a record was removed.
    fn remove_expired(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<bool, LedgerError>;

    /// Deletes every record expired at `now`. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, LedgerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: DashMap<Fingerprint, IdempotencyRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, fingerprint: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<bool, LedgerError> {
        match self.records.entry(record.fingerprint.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
        }
    }

    fn remove_expired(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        Ok(self
            .records
            .remove_if(fingerprint, |_, record| record.is_expired(now))
            .is_some())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// What to do with an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyDecision {
    /// Return this stored response without executing the request.
    Replay(IdempotencyRecord),
    /// Execute the request. Carries the fingerprint to store the outcome under,
    /// or `None` when the request had no token.
    Continue(Option<Fingerprint>),
}

/// Idempotency cache with a background expiry sweeper.
pub struct IdempotencyCache {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    sweeper: Option<Sender<()>>,
}

impl IdempotencyCache {
    /// Builds a cache and starts its sweeper thread.
    ///
    /// If the thread cannot be spawned the cache still works; expired
    /// records are then only dropped when read.
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        let (tx, rx) = channel::bounded::<()>(1);
        let sweep_store = Arc::clone(&store);
        let spawned = thread::Builder::new()
            .name("idempotency-sweeper".to_string())
            .spawn(move || {
                // Ends once the cache (and with it the sender) is dropped.
                while rx.recv().is_ok() {
                    sweep(sweep_store.as_ref(), Utc::now());
                }
            });

        let sweeper = match spawned {
            Ok(_) => Some(tx),
            Err(err) => {
                error!(error = %err, "failed to start idempotency sweeper");
                None
            }
        };
        Self { store, ttl, sweeper }
    }

    /// Decides whether a request is a replay.
    pub fn before(
        &self,
        caller: &UserId,
        path: &str,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyDecision, LedgerError> {
        let Some(token) = token else {
            return Ok(IdempotencyDecision::Continue(None));
        };
        let key = fingerprint(caller, path, token);

        match self.store.get(&key)? {
            Some(record) if !record.is_expired(now) => {
                debug!(caller = %caller, path, "replaying stored response");
                Ok(IdempotencyDecision::Replay(record))
            }
            Some(_) => {
                if !self.store.remove_expired(&key, now)? {
                    // A concurrent retry replaced it with a fresh response.
                    if let Some(record) = self.store.get(&key)?.filter(|r| !r.is_expired(now)) {
                        return Ok(IdempotencyDecision::Replay(record));
                    }
                }
                Ok(IdempotencyDecision::Continue(Some(key)))
            }
            None => Ok(IdempotencyDecision::Continue(Some(key))),
        }
    }

    /// Stores a completed response. Non-2xx outcomes are never stored.
    ///
    /// The first writer for a fingerprint wins; later writers are ignored.
    pub fn after(
        &self,
        fingerprint: Fingerprint,
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if !(200..300).contains(&status) {
            return Ok(false);
        }
        let stored = self.store.insert_if_absent(IdempotencyRecord {
            fingerprint,
            status,
            content_type,
            body,
            created_at: now,
            expires_at: now + self.ttl,
        })?;
        if stored {
            self.wake_sweeper();
        }
        Ok(stored)
    }

    /// Runs a sweep on the calling thread.
    pub fn sweep_now(&self, now: DateTime<Utc>) -> usize {
        sweep(self.store.as_ref(), now)
    }

    fn wake_sweeper(&self) {
        let Some(sweeper) = &self.sweeper else {
            return;
        };
        match sweeper.try_send(()) {
            // Full: a sweep is already queued.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                error!("idempotency sweeper has stopped");
            }
        }
    }
}

fn sweep(store: &dyn IdempotencyStore, now: DateTime<Utc>) -> usize {
    match store.purge_expired(now) {
        Ok(0) => 0,
        Ok(removed) => {
            info!(removed, "purged expired idempotency records");
            removed
        }
        Err(err) => {
            error!(error = %err, "idempotency sweep failed");
            0
        }
    }
}
