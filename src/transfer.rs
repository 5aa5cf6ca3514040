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

//! Peer-to-peer transfers.
//!
//! A transfer debits the sender and credits the recipient inside one atomic
//! unit, writing one record per leg. Readers observe either the state before
//! the transfer or the state after it.
//!
//! # Checks, in order
//!
//! | Step | Failure |
//! |------|---------|
//! | amount > 0 | [`LedgerError::InvalidAmount`] |
//! | sender has a wallet | [`LedgerError::WalletNotFound`] |
//! | sender balance ≥ amount | [`LedgerError::InsufficientFunds`] |
//! | recipient number exists | [`LedgerError::RecipientNotFound`] |
//! | recipient ≠ sender | [`LedgerError::SelfTransferRejected`] |

use crate::LedgerError;
use crate::base::{Reference, UserId, WalletId, WalletNumber};
use crate::money::Money;
use crate::store::LedgerStore;
use crate::transaction::TransactionRecord;
use std::sync::Arc;
use tracing::info;

/// References of the two legs written by a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub debit: Reference,
    pub credit: Reference,
    pub sender_wallet: WalletId,
    pub recipient_wallet: WalletId,
    pub amount: Money,
}

/// Executes transfers against a [`LedgerStore`].
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<LedgerStore>,
}

impl TransferEngine {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Moves `amount` from the sender's wallet to the wallet carrying
    /// `recipient_number`.
    pub fn transfer(
        &self,
        sender: &UserId,
        recipient_number: &WalletNumber,
        amount: Money,
    ) -> Result<TransferReceipt, LedgerError> {
        let amount = Money::positive(amount.minor_units())?;

        let sender_wallet = self.store.owner_wallet(sender)?;
        let recipient_wallet = self.store.numbered_wallet(recipient_number);

        let sender_id = sender_wallet.id();
        let recipient_id = recipient_wallet.as_ref().map(|w| w.id());
        let mut locked = vec![sender_id];
        locked.extend(recipient_id);

        let receipt = self.store.atomically(&locked, |unit| {
            if unit.balance(&sender_id)? < amount {
                return Err(LedgerError::InsufficientFunds);
            }
            let recipient_id = recipient_id.ok_or(LedgerError::RecipientNotFound)?;
            if recipient_id == sender_id {
                return Err(LedgerError::SelfTransferRejected);
            }
            let recipient_owner = unit.wallet(&recipient_id)?.owner().clone();

            unit.debit(&sender_id, amount)?;
            unit.credit(&recipient_id, amount)?;

            let debit = TransactionRecord::transfer_debit(sender.clone(), sender_id, amount, recipient_id);
            let credit =
                TransactionRecord::transfer_credit(recipient_owner, recipient_id, amount, sender_id);
            let receipt = TransferReceipt {
                debit: debit.reference.clone(),
                credit: credit.reference.clone(),
                sender_wallet: sender_id,
                recipient_wallet: recipient_id,
                amount,
            };
            unit.insert(debit)?;
            unit.insert(credit)?;
            Ok(receipt)
        })?;

        info!(
            sender = %sender,
            recipient = %recipient_number,
            amount = %amount,
            debit = %receipt.debit,
            "transfer committed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordChange;
    use crate::transaction::{TransactionKind, TransactionStatus};

    fn fund(store: &LedgerStore, owner: &str, amount: i64) -> WalletNumber {
        let wallet = store.create_wallet(UserId::new(owner), format!("{owner}@example.com")).unwrap();
        if amount > 0 {
            let record = TransactionRecord::pending_deposit(UserId::new(owner), wallet.id, Money::from_minor(amount));
            let reference = record.reference.clone();
            store.insert_record(record).unwrap();
            store
                .adjust_balance(
                    wallet.id,
                    amount,
                    Money::ZERO,
                    RecordChange::Advance(reference, TransactionStatus::Success),
                )
                .unwrap();
        }
        wallet.wallet_number
    }

    #[test]
    fn transfer_moves_funds_and_writes_two_legs() {
        let store = Arc::new(LedgerStore::new());
        fund(&store, "alice", 5000);
        let bob = fund(&store, "bob", 0);
        let engine = TransferEngine::new(Arc::clone(&store));

        let receipt = engine
            .transfer(&UserId::new("alice"), &bob, Money::from_minor(3000))
            .unwrap();

        assert_eq!(store.get_balance(&receipt.sender_wallet), Ok(Money::from_minor(2000)));
        assert_eq!(store.get_balance(&receipt.recipient_wallet), Ok(Money::from_minor(3000)));

        let debit = store.transaction(&receipt.debit).unwrap();
        let credit = store.transaction(&receipt.credit).unwrap();
        assert_eq!(debit.kind, TransactionKind::TransferDebit);
        assert_eq!(credit.kind, TransactionKind::TransferCredit);
        assert_eq!(debit.status, TransactionStatus::Success);
        assert_eq!(credit.status, TransactionStatus::Success);
        assert_eq!(debit.counterparty, Some(receipt.recipient_wallet));
        assert_eq!(credit.counterparty, Some(receipt.sender_wallet));
        assert_eq!(credit.owner, UserId::new("bob"));
    }

    #[test]
    fn insufficient_funds_checked_before_recipient() {
        let store = Arc::new(LedgerStore::new());
        fund(&store, "alice", 100);
        let engine = TransferEngine::new(Arc::clone(&store));

        let result = engine.transfer(
            &UserId::new("alice"),
            &WalletNumber("0000000000000".into()),
            Money::from_minor(500),
        );
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
    }

    #[test]
    fn missing_sender_wallet() {
        let store = Arc::new(LedgerStore::new());
        let bob = fund(&store, "bob", 0);
        let engine = TransferEngine::new(store);
        assert_eq!(
            engine.transfer(&UserId::new("ghost"), &bob, Money::from_minor(1)),
            Err(LedgerError::WalletNotFound)
        );
    }

    #[test]
    fn zero_amount_is_invalid() {
        let store = Arc::new(LedgerStore::new());
        fund(&store, "alice", 100);
        let bob = fund(&store, "bob", 0);
        let engine = TransferEngine::new(store);
        assert_eq!(
            engine.transfer(&UserId::new("alice"), &bob, Money::ZERO),
            Err(LedgerError::InvalidAmount)
        );
    }
}
