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

//! Wallet rows.
//!
//! A wallet's balance and journal live behind one [`parking_lot::Mutex`]: the
//! row lock. Holding the guard is what makes a read-modify-write of the
//! balance serializable with respect to other units touching the same wallet.
//!
//! # Example
//!
//! ```
//! use wallet_ledger::{Money, UserId, Wallet, WalletNumber};
//!
//! let wallet = Wallet::new(UserId::new("u1"), "u1@example.com", WalletNumber::generate());
//! assert_eq!(wallet.balance(), Money::ZERO);
//! ```

use crate::base::{Reference, UserId, WalletId, WalletNumber};
use crate::money::Money;
use crate::LedgerError;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct WalletData {
    balance: Money,
    /// References of this wallet's records, oldest first.
    journal: Vec<Reference>,
}

impl WalletData {
    fn new() -> Self {
        Self {
            balance: Money::ZERO,
            journal: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            !self.balance.is_negative(),
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    pub(crate) fn balance(&self) -> Money {
        self.balance
    }

    /// Computes `balance + delta` without applying it.
    ///
    /// Fails with [`LedgerError::InsufficientFunds`] if the result would fall
    /// below `minimum`.
    pub(crate) fn preview(
        balance: Money,
        delta: i64,
        minimum: Money,
    ) -> Result<Money, LedgerError> {
        let next = balance
            .checked_apply(delta)
            .ok_or_else(|| LedgerError::Validation("balance overflow".to_string()))?;
        if next < minimum || next.is_negative() {
            return Err(LedgerError::InsufficientFunds);
        }
        Ok(next)
    }

    pub(crate) fn set_balance(&mut self, balance: Money) {
        self.balance = balance;
        self.assert_invariants();
    }

    pub(crate) fn record(&mut self, reference: Reference) {
        self.journal.push(reference);
    }

    pub(crate) fn journal(&self) -> &[Reference] {
        &self.journal
    }
}

/// Ledger wallet.
#[derive(Debug)]
pub struct Wallet {
    id: WalletId,
    owner: UserId,
    email: String,
    number: WalletNumber,
    inner: Mutex<WalletData>,
}

impl Wallet {
    pub fn new(owner: UserId, email: impl Into<String>, number: WalletNumber) -> Self {
        Self {
            id: WalletId::generate(),
            owner,
            email: email.into(),
            number,
            inner: Mutex::new(WalletData::new()),
        }
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn number(&self) -> &WalletNumber {
        &self.number
    }

    pub fn balance(&self) -> Money {
        self.inner.lock().balance
    }

    /// Acquires the row lock, blocking for at most `timeout`.
    ///
    /// A timed-out wait surfaces as [`LedgerError::StoreConflict`].
    pub(crate) fn lock_within(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, WalletData>, LedgerError> {
        self.inner
            .try_lock_for(timeout)
            .ok_or(LedgerError::StoreConflict)
    }

    /// Returns a consistent copy of the wallet row.
    pub fn snapshot(&self) -> WalletSnapshot {
        let data = self.inner.lock();
        WalletSnapshot {
            id: self.id,
            owner: self.owner.clone(),
            email: self.email.clone(),
            wallet_number: self.number.clone(),
            balance: data.balance,
            transactions: data.journal.len(),
        }
    }
}

/// Point-in-time view of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub id: WalletId,
    pub owner: UserId,
    pub email: String,
    pub wallet_number: WalletNumber,
    pub balance: Money,
    pub transactions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Wallet {
        Wallet::new(UserId::new("u1"), "u1@example.com", WalletNumber::generate())
    }

    #[test]
    fn preview_credits_and_debits() {
        let balance = Money::from_minor(5000);
        assert_eq!(
            WalletData::preview(balance, 1000, Money::ZERO),
            Ok(Money::from_minor(6000))
        );
        assert_eq!(
            WalletData::preview(balance, -5000, Money::ZERO),
            Ok(Money::ZERO)
        );
    }

    #[test]
    fn preview_rejects_going_below_minimum() {
        let balance = Money::from_minor(2000);
        assert_eq!(
            WalletData::preview(balance, -6000, Money::ZERO),
            Err(LedgerError::InsufficientFunds)
        );
        assert_eq!(
            WalletData::preview(balance, -1500, Money::from_minor(1000)),
            Err(LedgerError::InsufficientFunds)
        );
    }

    #[test]
    fn preview_rejects_overflow() {
        let result = WalletData::preview(Money::from_minor(i64::MAX), 1, Money::ZERO);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn lock_within_times_out_as_store_conflict() {
        let wallet = wallet();
        let _held = wallet.lock_within(Duration::from_millis(10)).unwrap();
        let second = wallet.lock_within(Duration::from_millis(10));
        assert!(matches!(second, Err(LedgerError::StoreConflict)));
    }

    #[test]
    fn snapshot_reflects_journal_and_balance() {
        let wallet = wallet();
        {
            let mut data = wallet.lock_within(Duration::from_millis(10)).unwrap();
            data.set_balance(Money::from_minor(700));
            data.record(Reference::generate());
        }
        let snapshot = wallet.snapshot();
        assert_eq!(snapshot.balance, Money::from_minor(700));
        assert_eq!(snapshot.transactions, 1);
        assert_eq!(snapshot.owner, UserId::new("u1"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["balance"], 700);
        assert_eq!(json["wallet_number"].as_str().unwrap().len(), 13);
    }
}
