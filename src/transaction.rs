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

//! Transaction records.
//!
//! Records follow a state machine with final terminal states:
//! - [`Pending`] → [`Success`] (provider confirmed the deposit)
//! - [`Pending`] → [`Failed`] (provider reported failure)
//!
//! Transfer legs are created directly in [`Success`].
//!
//! [`Pending`]: TransactionStatus::Pending
//! [`Success`]: TransactionStatus::Success
//! [`Failed`]: TransactionStatus::Failed

use crate::base::{Reference, UserId, WalletId};
use crate::money::Money;
use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Deposit,
    TransferDebit,
    TransferCredit,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::TransferDebit => "transfer-debit",
            Self::TransferCredit => "transfer-credit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Validates a status change. Terminal states never move again.
    pub fn transition(self, to: TransactionStatus) -> Result<TransactionStatus, LedgerError> {
        match (self, to) {
            (Self::Pending, Self::Success) | (Self::Pending, Self::Failed) => Ok(to),
            (from, to) => Err(LedgerError::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A durable entry of the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub reference: Reference,
    pub owner: UserId,
    /// Wallet whose journal carries this record.
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    /// The other side of a transfer leg.
    pub counterparty: Option<WalletId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn pending_deposit(owner: UserId, wallet_id: WalletId, amount: Money) -> Self {
        Self::new(owner, wallet_id, TransactionKind::Deposit, amount, TransactionStatus::Pending, None)
    }

    pub fn transfer_debit(
        owner: UserId,
        wallet_id: WalletId,
        amount: Money,
        recipient: WalletId,
    ) -> Self {
        Self::new(
            owner,
            wallet_id,
            TransactionKind::TransferDebit,
            amount,
            TransactionStatus::Success,
            Some(recipient),
        )
    }

    pub fn transfer_credit(
        owner: UserId,
        wallet_id: WalletId,
        amount: Money,
        sender: WalletId,
    ) -> Self {
        Self::new(
            owner,
            wallet_id,
            TransactionKind::TransferCredit,
            amount,
            TransactionStatus::Success,
            Some(sender),
        )
    }

    fn new(
        owner: UserId,
        wallet_id: WalletId,
        kind: TransactionKind,
        amount: Money,
        status: TransactionStatus,
        counterparty: Option<WalletId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference: Reference::generate(),
            owner,
            wallet_id,
            kind,
            amount,
            status,
            counterparty,
            created_at: now,
            updated_at: now,
        }
    }
}
