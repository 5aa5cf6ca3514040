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

//! Error types for ledger operations.

use crate::credential::Permission;
use crate::money::Money;
use crate::transaction::TransactionStatus;
use thiserror::Error;

/// Ledger operation errors.
///
/// Every failure of a ledger-mutating operation leaves the store unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Malformed or out-of-range input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Caller has no wallet
    #[error("wallet not found")]
    WalletNotFound,

    /// No wallet carries the requested wallet number
    #[error("recipient wallet not found")]
    RecipientNotFound,

    /// No transaction record carries the requested reference
    #[error("transaction not found")]
    TransactionNotFound,

    /// Debit would take the balance below its allowed minimum
    #[error("insufficient balance")]
    InsufficientFunds,

    /// Sender and recipient resolve to the same wallet
    #[error("cannot transfer to your own wallet")]
    SelfTransferRejected,

    /// Provider notification failed signature verification
    #[error("invalid signature")]
    InvalidSignature,

    /// Provider notification body could not be parsed
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Notified amount differs from the initiated amount
    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Money, received: Money },

    /// Status change not allowed by the transaction state machine
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// A record with the same reference already exists
    #[error("duplicate transaction reference")]
    DuplicateReference,

    /// The owner already has a wallet
    #[error("owner already has a wallet")]
    DuplicateWallet,

    /// Credential exceeded its request budget for the current window
    #[error("rate limit exceeded")]
    RateLimited,

    /// Missing, unknown, expired, or inactive credential
    #[error("authentication required")]
    Unauthorized,

    /// Credential lacks the permission the operation requires
    #[error("insufficient permissions: '{0}' required")]
    Forbidden(Permission),

    /// Transient serialization failure; the whole atomic unit may be retried
    #[error("store conflict, retry the operation")]
    StoreConflict,

    /// The payment provider could not be reached or rejected the call
    #[error("payment provider unavailable: {0}")]
    CollaboratorUnavailable(String),
}

impl LedgerError {
    /// Returns true for failures that are safe to retry as a whole unit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreConflict)
    }
}
