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

//! # Wallet Ledger
//!
//! A wallet ledger that keeps per-user balances consistent under concurrent
//! access: atomic peer-to-peer transfers, provider-confirmed deposits that
//! credit at most once per reference, and replay protection for retried
//! client requests.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: wallet rows, the transaction log, and atomic units over them
//! - [`TransferEngine`]: debits the sender and credits the recipient in one unit
//! - [`DepositReconciler`]: two-phase deposits confirmed by signed provider notifications
//! - [`IdempotencyCache`]: replays stored responses for repeated idempotency tokens
//! - [`RateGuard`]: per-credential fixed-window request limiter
//! - [`LedgerError`]: error types for every failing operation
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger::{LedgerStore, Money, TransferEngine, UserId};
//!
//! let store = Arc::new(LedgerStore::new());
//! let alice = store.create_wallet(UserId::new("alice"), "alice@example.com").unwrap();
//! let bob = store.create_wallet(UserId::new("bob"), "bob@example.com").unwrap();
//!
//! // Alice has no funds yet, so the transfer is refused and nothing changes.
//! let engine = TransferEngine::new(Arc::clone(&store));
//! let result = engine.transfer(&UserId::new("alice"), &bob.wallet_number, Money::from_minor(100));
//! assert!(result.is_err());
//! assert_eq!(store.get_balance(&alice.id), Ok(Money::ZERO));
//! ```
//!
//! ## Thread Safety
//!
//! Each wallet row has its own lock. Units that touch disjoint wallets run in
//! parallel; units that share a wallet are serialized on its row lock.

pub mod api;
mod base;
pub mod config;
pub mod credential;
pub mod deposit;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod logging;
mod money;
pub mod rate_guard;
pub mod signature;
pub mod store;
mod transaction;
mod transaction_log;
pub mod transfer;
mod wallet;

pub use base::{KeyId, Reference, UserId, WalletId, WalletNumber};
pub use config::Config;
pub use credential::{Credential, InMemoryCredentials, Permission};
pub use deposit::{DepositIntent, DepositReconciler, Settlement, WebhookOutcome};
pub use error::LedgerError;
pub use gateway::{PaymentGateway, PaystackGateway};
pub use idempotency::{IdempotencyCache, InMemoryIdempotencyStore};
pub use money::Money;
pub use rate_guard::RateGuard;
pub use store::{AtomicUnit, LedgerStore, RecordChange, StoreSettings};
pub use transaction::{TransactionKind, TransactionRecord, TransactionStatus};
pub use transaction_log::TransactionLog;
pub use transfer::{TransferEngine, TransferReceipt};
pub use wallet::{Wallet, WalletSnapshot};
