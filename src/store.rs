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

//! Ledger store.
//!
//! The [`LedgerStore`] owns every wallet row and the transaction log. All
//! mutations go through [`LedgerStore::atomically`], which runs a closure
//! against an [`AtomicUnit`]:
//!
//! 1. Row locks for every wallet the unit touches are acquired in ascending
//!    [`WalletId`] order, so two units never wait on each other in a cycle.
//! 2. The closure stages balance deltas, record inserts, and status changes.
//!    Nothing is visible to other units while staging.
//! 3. On `Ok`, staged records are written first, then balances. On `Err`,
//!    nothing is written.
//!
//! A lock wait that exceeds the configured timeout fails the attempt with
//! [`LedgerError::StoreConflict`]; the whole unit is then retried a bounded
//! number of times.
//!
//! # Thread Safety
//!
//! Wallet lookups go through [`DashMap`]s; row data sits behind each wallet's
//! own mutex, so units touching disjoint wallets run in parallel.

use crate::base::{Reference, UserId, WalletId, WalletNumber};
use crate::money::Money;
use crate::transaction::{TransactionRecord, TransactionStatus};
use crate::transaction_log::TransactionLog;
use crate::wallet::{Wallet, WalletData, WalletSnapshot};
use crate::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lock-wait and retry bounds of the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    /// How long an atomic unit waits for a single row lock.
    pub lock_timeout: Duration,
    /// Total attempts for a unit that keeps hitting [`LedgerError::StoreConflict`].
    pub max_attempts: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

/// The record side of a balance adjustment.
#[derive(Debug, Clone)]
pub enum RecordChange {
    Insert(TransactionRecord),
    Advance(Reference, TransactionStatus),
}

/// In-memory ledger store with row-level locking.
pub struct LedgerStore {
    wallets: DashMap<WalletId, Arc<Wallet>>,
    by_owner: DashMap<UserId, WalletId>,
    by_number: DashMap<WalletNumber, WalletId>,
    log: TransactionLog,
    settings: StoreSettings,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::with_settings(StoreSettings::default())
    }

    pub fn with_settings(settings: StoreSettings) -> Self {
        Self {
            wallets: DashMap::new(),
            by_owner: DashMap::new(),
            by_number: DashMap::new(),
            log: TransactionLog::new(),
            settings,
        }
    }

    /// Creates the owner's wallet with a zero balance and a fresh wallet number.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateWallet`] if the owner already has one.
    pub fn create_wallet(
        &self,
        owner: UserId,
        email: impl Into<String>,
    ) -> Result<WalletSnapshot, LedgerError> {
        let email: String = email.into();
        let owner_entry = match self.by_owner.entry(owner.clone()) {
            Entry::Occupied(_) => return Err(LedgerError::DuplicateWallet),
            Entry::Vacant(entry) => entry,
        };

        // Wallet numbers are never reused; draw until one is free.
        let wallet = loop {
            let number = WalletNumber::generate();
            if let Entry::Vacant(number_entry) = self.by_number.entry(number.clone()) {
                let wallet = Arc::new(Wallet::new(owner.clone(), email, number));
                self.wallets.insert(wallet.id(), Arc::clone(&wallet));
                number_entry.insert(wallet.id());
                break wallet;
            }
        };
        owner_entry.insert(wallet.id());

        info!(owner = %owner, wallet_number = %wallet.number(), "wallet created");
        Ok(wallet.snapshot())
    }

    pub fn wallet_for_owner(&self, owner: &UserId) -> Option<WalletSnapshot> {
        self.owner_wallet(owner).ok().map(|w| w.snapshot())
    }

    pub fn wallet_by_number(&self, number: &WalletNumber) -> Option<WalletSnapshot> {
        self.numbered_wallet(number).map(|w| w.snapshot())
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    pub fn get_balance(&self, wallet_id: &WalletId) -> Result<Money, LedgerError> {
        Ok(self.wallet(wallet_id)?.balance())
    }

    /// Reads several balances under their row locks at once.
    ///
    /// The result is a consistent cut: no unit commits between the reads.
    pub fn balances(&self, wallet_ids: &[WalletId]) -> Result<Vec<Money>, LedgerError> {
        self.atomically(wallet_ids, |unit| {
            wallet_ids.iter().map(|id| unit.balance(id)).collect()
        })
    }

    /// Applies `balance += delta` together with its record change.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientFunds`] if the result would fall below
    /// `expected_minimum` (or below zero); the store is left unchanged.
    pub fn adjust_balance(
        &self,
        wallet_id: WalletId,
        delta: i64,
        expected_minimum: Money,
        change: RecordChange,
    ) -> Result<Money, LedgerError> {
        self.atomically(&[wallet_id], |unit| {
            let balance = unit.adjust(&wallet_id, delta, expected_minimum)?;
            match change.clone() {
                RecordChange::Insert(record) => unit.insert(record)?,
                RecordChange::Advance(reference, to) => unit.advance(&reference, to)?,
            }
            Ok(balance)
        })
    }

    /// Appends a record that moves no money (e.g. a pending deposit).
    pub fn insert_record(&self, record: TransactionRecord) -> Result<(), LedgerError> {
        let wallet_id = record.wallet_id;
        self.atomically(&[wallet_id], |unit| unit.insert(record.clone()))
    }

    pub fn transaction(&self, reference: &Reference) -> Option<TransactionRecord> {
        self.log.get(reference)
    }

    /// Returns the owner's records, newest first.
    pub fn history(&self, owner: &UserId) -> Result<Vec<TransactionRecord>, LedgerError> {
        let wallet = self.owner_wallet(owner)?;
        let journal = {
            let data = wallet.lock_within(self.settings.lock_timeout)?;
            data.journal().to_vec()
        };
        Ok(journal
            .iter()
            .rev()
            .filter_map(|reference| self.log.get(reference))
            .collect())
    }

    /// Runs `op` as one atomic unit over `wallet_ids`.
    ///
    /// Retries the whole unit on [`LedgerError::StoreConflict`] up to the
    /// configured number of attempts. `op` may therefore run more than once
    /// and must not have side effects outside the unit.
    pub fn atomically<T, F>(&self, wallet_ids: &[WalletId], mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut(&mut AtomicUnit<'_>) -> Result<T, LedgerError>,
    {
        let mut attempt = 1;
        loop {
            match self.try_atomically(wallet_ids, &mut op) {
                Err(err) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    warn!(attempt, "store conflict, retrying atomic unit");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn try_atomically<T, F>(&self, wallet_ids: &[WalletId], op: &mut F) -> Result<T, LedgerError>
    where
        F: FnMut(&mut AtomicUnit<'_>) -> Result<T, LedgerError>,
    {
        let mut ids = wallet_ids.to_vec();
        ids.sort();
        ids.dedup();

        let wallets = ids
            .iter()
            .map(|id| self.wallet(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = HashMap::with_capacity(wallets.len());
        for wallet in &wallets {
            let data = wallet.lock_within(self.settings.lock_timeout)?;
            rows.insert(
                wallet.id(),
                Row {
                    wallet: wallet.as_ref(),
                    data,
                    staged: None,
                },
            );
        }

        let mut unit = AtomicUnit {
            rows,
            log: &self.log,
            inserts: Vec::new(),
            advances: Vec::new(),
        };
        let output = op(&mut unit)?;
        unit.commit()?;
        Ok(output)
    }

    pub(crate) fn wallet(&self, id: &WalletId) -> Result<Arc<Wallet>, LedgerError> {
        self.wallets
            .get(id)
            .map(|w| Arc::clone(w.value()))
            .ok_or(LedgerError::WalletNotFound)
    }

    pub(crate) fn owner_wallet(&self, owner: &UserId) -> Result<Arc<Wallet>, LedgerError> {
        let id = *self
            .by_owner
            .get(owner)
            .ok_or(LedgerError::WalletNotFound)?
            .value();
        self.wallet(&id)
    }

    pub(crate) fn numbered_wallet(&self, number: &WalletNumber) -> Option<Arc<Wallet>> {
        let id = *self.by_number.get(number)?.value();
        self.wallet(&id).ok()
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

struct Row<'a> {
    wallet: &'a Wallet,
    data: MutexGuard<'a, WalletData>,
    staged: Option<Money>,
}

impl Row<'_> {
    fn balance(&self) -> Money {
        self.staged.unwrap_or_else(|| self.data.balance())
    }
}

/// Staged changes over a set of locked wallet rows.
///
/// Dropping a unit without committing discards everything it staged.
pub struct AtomicUnit<'a> {
    rows: HashMap<WalletId, Row<'a>>,
    log: &'a TransactionLog,
    inserts: Vec<TransactionRecord>,
    advances: Vec<(Reference, TransactionStatus)>,
}

impl<'a> AtomicUnit<'a> {
    /// Balance as seen by this unit, including its own staged changes.
    pub fn balance(&self, wallet_id: &WalletId) -> Result<Money, LedgerError> {
        Ok(self.row(wallet_id)?.balance())
    }

    pub fn wallet(&self, wallet_id: &WalletId) -> Result<&Wallet, LedgerError> {
        Ok(self.row(wallet_id)?.wallet)
    }

    /// Stages `balance += delta`, failing if the result would drop below `minimum`.
    pub fn adjust(
        &mut self,
        wallet_id: &WalletId,
        delta: i64,
        minimum: Money,
    ) -> Result<Money, LedgerError> {
        let row = self
            .rows
            .get_mut(wallet_id)
            .ok_or(LedgerError::WalletNotFound)?;
        let next = WalletData::preview(row.balance(), delta, minimum)?;
        row.staged = Some(next);
        Ok(next)
    }

    pub fn credit(&mut self, wallet_id: &WalletId, amount: Money) -> Result<Money, LedgerError> {
        self.adjust(wallet_id, amount.minor_units(), Money::ZERO)
    }

    pub fn debit(&mut self, wallet_id: &WalletId, amount: Money) -> Result<Money, LedgerError> {
        let delta = amount
            .minor_units()
            .checked_neg()
            .ok_or(LedgerError::InvalidAmount)?;
        self.adjust(wallet_id, delta, Money::ZERO)
    }

    /// Stages a new record on one of the unit's wallets.
    pub fn insert(&mut self, record: TransactionRecord) -> Result<(), LedgerError> {
        self.row(&record.wallet_id)?;
        if self.log.get(&record.reference).is_some()
            || self.inserts.iter().any(|r| r.reference == record.reference)
        {
            return Err(LedgerError::DuplicateReference);
        }
        self.inserts.push(record);
        Ok(())
    }

    /// Reads a record as of this unit, including staged status changes.
    pub fn record(&self, reference: &Reference) -> Option<TransactionRecord> {
        let mut record = self
            .inserts
            .iter()
            .find(|r| &r.reference == reference)
            .cloned()
            .or_else(|| self.log.get(reference))?;
        if let Some((_, status)) = self.advances.iter().rev().find(|(r, _)| r == reference) {
            record.status = *status;
        }
        Some(record)
    }

    /// Stages a status change of a record owned by one of the unit's wallets.
    pub fn advance(
        &mut self,
        reference: &Reference,
        to: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let record = self
            .record(reference)
            .ok_or(LedgerError::TransactionNotFound)?;
        // Status writes are serialized by the owning wallet's row lock.
        self.row(&record.wallet_id)?;
        record.status.transition(to)?;
        self.advances.push((reference.clone(), to));
        Ok(())
    }

    fn row(&self, wallet_id: &WalletId) -> Result<&Row<'a>, LedgerError> {
        self.rows.get(wallet_id).ok_or_else(|| {
            LedgerError::Validation(format!("wallet {} is not part of this unit", wallet_id))
        })
    }

    fn commit(mut self) -> Result<(), LedgerError> {
        let moves_money = self.rows.values().any(|row| row.staged.is_some());
        if moves_money && self.inserts.is_empty() && self.advances.is_empty() {
            return Err(LedgerError::Validation(
                "balance change without a transaction record".to_string(),
            ));
        }

        let mut written: Vec<Reference> = Vec::with_capacity(self.inserts.len());
        for record in &self.inserts {
            if let Err(err) = self.log.insert(record.clone()) {
                self.rollback(&written);
                return Err(err);
            }
            written.push(record.reference.clone());
        }

        for (reference, to) in &self.advances {
            let staged_insert = self.inserts.iter().any(|r| &r.reference == reference);
            if staged_insert {
                continue;
            }
            if let Err(err) = self.log.advance(reference, *to) {
                self.rollback(&written);
                return Err(err);
            }
        }

        // Records created and advanced in the same unit carry their final status.
        for (reference, to) in &self.advances {
            if self.inserts.iter().any(|r| &r.reference == reference) {
                self.log.advance(reference, *to)?;
            }
        }

        for record in self.inserts.drain(..) {
            if let Some(row) = self.rows.get_mut(&record.wallet_id) {
                row.data.record(record.reference);
            }
        }
        for row in self.rows.values_mut() {
            if let Some(balance) = row.staged.take() {
                row.data.set_balance(balance);
                debug!(wallet = %row.wallet.id(), balance = %balance, "balance committed");
            }
        }
        Ok(())
    }

    fn rollback(&self, written: &[Reference]) {
        for reference in written {
            self.log.discard(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_store(balance: i64) -> (LedgerStore, WalletSnapshot) {
        let store = LedgerStore::new();
        let wallet = store.create_wallet(UserId::new("alice"), "alice@example.com").unwrap();
        if balance > 0 {
            let record = TransactionRecord::pending_deposit(
                UserId::new("alice"),
                wallet.id,
                Money::from_minor(balance),
            );
            let reference = record.reference.clone();
            store.insert_record(record).unwrap();
            store
                .adjust_balance(
                    wallet.id,
                    balance,
                    Money::ZERO,
                    RecordChange::Advance(reference, TransactionStatus::Success),
                )
                .unwrap();
        }
        (store, wallet)
    }

    #[test]
    fn one_wallet_per_owner() {
        let store = LedgerStore::new();
        store.create_wallet(UserId::new("alice"), "a@example.com").unwrap();
        assert_eq!(
            store.create_wallet(UserId::new("alice"), "a@example.com"),
            Err(LedgerError::DuplicateWallet)
        );
        assert_eq!(store.wallet_count(), 1);
    }

    #[test]
    fn wallet_numbers_resolve_back_to_wallet() {
        let store = LedgerStore::new();
        let created = store.create_wallet(UserId::new("alice"), "a@example.com").unwrap();
        let found = store.wallet_by_number(&created.wallet_number).unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(store.wallet_for_owner(&UserId::new("alice")).unwrap().id, created.id);
    }

    #[test]
    fn adjust_balance_rejects_negative_result_and_changes_nothing() {
        let (store, wallet) = funded_store(1000);
        let record = TransactionRecord::transfer_debit(
            UserId::new("alice"),
            wallet.id,
            Money::from_minor(5000),
            WalletId::generate(),
        );
        let reference = record.reference.clone();

        let result = store.adjust_balance(wallet.id, -5000, Money::ZERO, RecordChange::Insert(record));
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
        assert_eq!(store.get_balance(&wallet.id), Ok(Money::from_minor(1000)));
        assert!(store.transaction(&reference).is_none());
    }

    #[test]
    fn balance_change_without_record_is_refused() {
        let (store, wallet) = funded_store(0);
        let result = store.atomically(&[wallet.id], |unit| {
            unit.credit(&wallet.id, Money::from_minor(100))?;
            Ok(())
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(store.get_balance(&wallet.id), Ok(Money::ZERO));
    }

    #[test]
    fn failed_unit_leaves_no_records_behind() {
        let (store, wallet) = funded_store(0);
        let record = TransactionRecord::pending_deposit(UserId::new("alice"), wallet.id, Money::from_minor(1));
        let reference = record.reference.clone();

        let result: Result<(), _> = store.atomically(&[wallet.id], |unit| {
            unit.insert(record.clone())?;
            Err(LedgerError::InsufficientFunds)
        });
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
        assert!(store.transaction(&reference).is_none());
        assert!(store.history(&UserId::new("alice")).unwrap().is_empty());
    }

    #[test]
    fn history_is_newest_first() {
        let (store, wallet) = funded_store(0);
        let mut references = Vec::new();
        for amount in [100, 200, 300] {
            let record = TransactionRecord::pending_deposit(
                UserId::new("alice"),
                wallet.id,
                Money::from_minor(amount),
            );
            references.push(record.reference.clone());
            store.insert_record(record).unwrap();
        }

        let history = store.history(&UserId::new("alice")).unwrap();
        let amounts: Vec<i64> = history.iter().map(|r| r.amount.minor_units()).collect();
        assert_eq!(amounts, vec![300, 200, 100]);
    }

    #[test]
    fn unit_sees_its_own_staged_changes() {
        let (store, wallet) = funded_store(500);
        store
            .atomically(&[wallet.id], |unit| {
                unit.debit(&wallet.id, Money::from_minor(200))?;
                assert_eq!(unit.balance(&wallet.id)?, Money::from_minor(300));
                unit.insert(TransactionRecord::transfer_debit(
                    UserId::new("alice"),
                    wallet.id,
                    Money::from_minor(200),
                    WalletId::generate(),
                ))
            })
            .unwrap();
        assert_eq!(store.get_balance(&wallet.id), Ok(Money::from_minor(300)));
    }

    #[test]
    fn lock_timeout_surfaces_as_store_conflict_after_retries() {
        let store = LedgerStore::with_settings(StoreSettings {
            lock_timeout: Duration::from_millis(5),
            max_attempts: 2,
        });
        let wallet = store.create_wallet(UserId::new("alice"), "a@example.com").unwrap();
        let row = store.wallet(&wallet.id).unwrap();
        let _held = row.lock_within(Duration::from_millis(5)).unwrap();

        let mut attempts = 0;
        let result = store.atomically(&[wallet.id], |_unit| {
            attempts += 1;
            Ok(())
        });
        assert_eq!(result, Err(LedgerError::StoreConflict));
        // The closure never ran: the lock was never granted.
        assert_eq!(attempts, 0);
    }

    #[test]
    fn unknown_wallet_fails_unit() {
        let store = LedgerStore::new();
        let result = store.atomically(&[WalletId::generate()], |_unit| Ok(()));
        assert_eq!(result, Err(LedgerError::WalletNotFound));
    }
}
