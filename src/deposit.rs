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

//! Deposit reconciliation.
//!
//! Deposits are two-phase:
//!
//! 1. **Initiation** writes a `pending` deposit record under a fresh reference
//!    and asks the payment provider for a checkout handle.
//! 2. **Confirmation** arrives later as a signed provider notification. A
//!    verified `charge.success` event moves the record to `success` and credits
//!    the wallet in the same atomic unit.
//!
//! ```text
//!  Deposit (Pending) ──charge.success──► Deposit (Success) + wallet credited
//!        │
//!        └──provider reports failure──► Deposit (Failed)
//! ```
//!
//! A reference is credited at most once no matter how often the provider
//! redelivers the notification: the status is re-read under the wallet's row
//! lock before crediting, and an already-`success` record is acknowledged
//! without touching the balance.
//!
//! The notified amount must equal the initiated amount; a mismatch is
//! rejected and the record stays `pending`.

use crate::LedgerError;
use crate::base::{Reference, UserId};
use crate::gateway::{CheckoutRequest, PaymentGateway, ProviderStatus};
use crate::money::Money;
use crate::signature;
use crate::store::LedgerStore;
use crate::transaction::{TransactionKind, TransactionRecord, TransactionStatus};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Event kind the provider sends for a completed payment.
pub const CHARGE_SUCCESS: &str = "charge.success";

/// Result of initiating a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositIntent {
    pub reference: Reference,
    pub checkout_url: String,
}

/// Outcome of applying a provider confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The wallet was credited by this call.
    Credited { amount: Money, balance: Money },
    /// The reference had already been credited; nothing changed.
    AlreadyApplied,
}

/// Outcome of a provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Settled {
        reference: Reference,
        settlement: Settlement,
    },
    /// Event kinds other than `charge.success` are acknowledged and dropped.
    Ignored { event: String },
}

/// Provider notification body.
///
/// `data` is kept raw until the event kind is known: other kinds carry
/// unrelated payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `data` of a `charge.success` event.

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEventData {
    pub reference: Reference,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Two-phase deposit processor.
#[derive(Clone)]
pub struct DepositReconciler {
    store: Arc<LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    secret: Arc<[u8]>,
}

impl DepositReconciler {
    pub fn new(
        store: Arc<LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        secret: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            store,
            gateway,
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Records a pending deposit and opens a provider checkout for it.
    ///
    /// The pending record is committed before the provider is called, so a
    /// notification can never arrive for a reference the ledger does not
    /// know. If the provider call fails the record simply stays `pending`.
    pub async fn initiate_deposit(
        &self,
        user: &UserId,
        amount: Money,
    ) -> Result<DepositIntent, LedgerError> {
        let amount = Money::positive(amount.minor_units())?;
        let wallet = self.store.owner_wallet(user)?;

        let record = TransactionRecord::pending_deposit(user.clone(), wallet.id(), amount);
        let reference = record.reference.clone();
        self.store.insert_record(record)?;

        let request = CheckoutRequest {
            email: wallet.email().to_string(),
            amount,
            reference: reference.clone(),
        };
        let checkout = self.gateway.initialize(&request).await.inspect_err(|err| {
            error!(reference = %reference, error = %err, "deposit initialization failed");
        })?;

        info!(user = %user, reference = %reference, amount = %amount, "deposit initiated");
        Ok(DepositIntent {
            reference,
            checkout_url: checkout.checkout_url,
        })
    }

    /// Verifies and applies a raw provider notification.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidSignature`] - tag does not match the body; nothing applied.
    /// - [`LedgerError::MalformedPayload`] - body is not a provider event.
    /// - [`LedgerError::TransactionNotFound`] - unknown reference.
    /// - [`LedgerError::AmountMismatch`] - notified amount differs from the initiated one.
    pub fn handle_webhook(
        &self,
        signature: &str,
        raw_payload: &[u8],
    ) -> Result<WebhookOutcome, LedgerError> {
        if let Err(err) = signature::verify(&self.secret, raw_payload, signature) {
            warn!(payload_len = raw_payload.len(), "rejected provider notification with invalid signature");
            return Err(err);
        }

        let event: ProviderEvent = serde_json::from_slice(raw_payload)
            .map_err(|e| LedgerError::MalformedPayload(e.to_string()))?;

        if event.event != CHARGE_SUCCESS {
            info!(event = %event.event, "ignoring provider event");
            return Ok(WebhookOutcome::Ignored { event: event.event });
        }

        let data: ProviderEventData = serde_json::from_value(event.data)
            .map_err(|e| LedgerError::MalformedPayload(e.to_string()))?;
        let reference = data.reference;
        let settlement = self.confirm_deposit(&reference, Money::from_minor(data.amount))?;
        Ok(WebhookOutcome::Settled {
            reference,
            settlement,
        })
    }

    /// Credits a pending deposit exactly once.
    ///
    /// The record's own amount is credited; `amount` is the notified value and
    /// must match it.
    pub fn confirm_deposit(
        &self,
        reference: &Reference,
        amount: Money,
    ) -> Result<Settlement, LedgerError> {
        let record = self.deposit_record(reference)?;
        if record.status == TransactionStatus::Success {
            info!(reference = %reference, "deposit already credited");
            return Ok(Settlement::AlreadyApplied);
        }

        let result = self.store.atomically(&[record.wallet_id], |unit| {
            // Re-read under the row lock: a concurrent delivery may have won.
            let current = unit
                .record(reference)
                .ok_or(LedgerError::TransactionNotFound)?;
            if current.status == TransactionStatus::Success {
                return Ok(Settlement::AlreadyApplied);
            }
            if amount != current.amount {
                return Err(LedgerError::AmountMismatch {
                    expected: current.amount,
                    received: amount,
                });
            }
            unit.advance(reference, TransactionStatus::Success)?;
            let balance = unit.credit(&current.wallet_id, current.amount)?;
            Ok(Settlement::Credited {
                amount: current.amount,
                balance,
            })
        });

        match &result {
            Ok(Settlement::Credited { amount, balance }) => {
                info!(reference = %reference, amount = %amount, balance = %balance, "deposit credited");
            }
            Ok(Settlement::AlreadyApplied) => {
                info!(reference = %reference, "deposit already credited");
            }
            Err(LedgerError::AmountMismatch { expected, received }) => {
                warn!(
                    reference = %reference,
                    expected = %expected,
                    received = %received,
                    "deposit notification amount mismatch"
                );
            }
            Err(err) => {
                error!(reference = %reference, error = %err, "deposit settlement failed");
            }
        }
        result
    }

    /// Moves a pending deposit to `failed`. Already-failed records are left alone.
    pub fn fail(&self, reference: &Reference) -> Result<TransactionRecord, LedgerError> {
        let record = self.deposit_record(reference)?;
        if record.status == TransactionStatus::Failed {
            return Ok(record);
        }
        self.store.atomically(&[record.wallet_id], |unit| {
            let current = unit
                .record(reference)
                .ok_or(LedgerError::TransactionNotFound)?;
            if current.status == TransactionStatus::Failed {
                return Ok(());
            }
            unit.advance(reference, TransactionStatus::Failed)
        })?;
        info!(reference = %reference, "deposit marked failed");
        self.deposit_record(reference)
    }

    /// Returns one of the caller's records by reference.
    ///
    /// Records owned by somebody else are reported as not found.
    pub fn deposit_status(
        &self,
        caller: &UserId,
        reference: &Reference,
    ) -> Result<TransactionRecord, LedgerError> {
        self.store
            .transaction(reference)
            .filter(|record| &record.owner == caller)
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// Asks the provider about a pending deposit and applies its answer.
    ///
    /// Used when a notification was lost: a provider-side success is settled
    /// through the same at-most-once path as the webhook.
    pub async fn verify_deposit(
        &self,
        caller: &UserId,
        reference: &Reference,
    ) -> Result<TransactionRecord, LedgerError> {
        let record = self.deposit_status(caller, reference)?;
        if record.kind != TransactionKind::Deposit || record.status.is_terminal() {
            return Ok(record);
        }

        let payment = self.gateway.verify(reference).await?;
        match payment.status {
            ProviderStatus::Success => {
                self.confirm_deposit(reference, payment.amount)?;
            }
            ProviderStatus::Failed => {
                self.fail(reference)?;
            }
            ProviderStatus::Pending => {}
        }
        self.deposit_status(caller, reference)
    }

    fn deposit_record(&self, reference: &Reference) -> Result<TransactionRecord, LedgerError> {
        let record = self
            .store
            .transaction(reference)
            .ok_or(LedgerError::TransactionNotFound)?;
        // Transfer legs are not deposits as far as the provider is concerned.
        if record.kind != TransactionKind::Deposit {
            return Err(LedgerError::TransactionNotFound);
        }
        Ok(record)
    }
}
