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

//! Ledger public API integration tests: transfers and deposit reconciliation.

use async_trait::async_trait;
use std::sync::Arc;
use std::thread;
use wallet_ledger::gateway::{Checkout, CheckoutRequest, ProviderPayment, ProviderStatus};
use wallet_ledger::{
    DepositReconciler, LedgerError, LedgerStore, Money, PaymentGateway, Reference, Settlement,
    TransactionKind, TransactionRecord, TransactionStatus, TransferEngine, UserId, WalletNumber,
    WalletSnapshot, WebhookOutcome, signature,
};

const SECRET: &str = "sk_test_integration";

/// Gateway that always opens a checkout and reports a fixed verification.
struct StubGateway {
    verified: Option<(ProviderStatus, i64)>,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout, LedgerError> {
        Ok(Checkout {
            checkout_url: format!("https://checkout.example/{}", request.reference),
            access_code: Some("code".to_string()),
        })
    }

    async fn verify(&self, reference: &Reference) -> Result<ProviderPayment, LedgerError> {
        let (status, amount) = self
            .verified
            .ok_or_else(|| LedgerError::CollaboratorUnavailable("offline".to_string()))?;
        Ok(ProviderPayment {
            reference: reference.clone(),
            amount: Money::from_minor(amount),
            status,
        })
    }
}

/// Gateway whose checkout call always fails.
struct DownGateway;

#[async_trait]
impl PaymentGateway for DownGateway {
    async fn initialize(&self, _request: &CheckoutRequest) -> Result<Checkout, LedgerError> {
        Err(LedgerError::CollaboratorUnavailable("timeout".to_string()))
    }

    async fn verify(&self, _reference: &Reference) -> Result<ProviderPayment, LedgerError> {
        Err(LedgerError::CollaboratorUnavailable("timeout".to_string()))
    }
}

struct Ledger {
    store: Arc<LedgerStore>,
    transfers: TransferEngine,
    deposits: DepositReconciler,
}

impl Ledger {
    fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway { verified: None }))
    }

    fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(LedgerStore::new());
        Self {
            transfers: TransferEngine::new(Arc::clone(&store)),
            deposits: DepositReconciler::new(Arc::clone(&store), gateway, SECRET),
            store,
        }
    }

    fn open(&self, owner: &str) -> WalletSnapshot {
        self.store
            .create_wallet(UserId::new(owner), format!("{owner}@example.com"))
            .unwrap()
    }

    fn pending_deposit(&self, owner: &str, amount: i64) -> Reference {
        let wallet = self.store.wallet_for_owner(&UserId::new(owner)).unwrap();
        let record =
            TransactionRecord::pending_deposit(UserId::new(owner), wallet.id, Money::from_minor(amount));
        let reference = record.reference.clone();
        self.store.insert_record(record).unwrap();
        reference
    }

    fn fund(&self, owner: &str, amount: i64) {
        let reference = self.pending_deposit(owner, amount);
        self.deposits
            .confirm_deposit(&reference, Money::from_minor(amount))
            .unwrap();
    }

    fn balance(&self, owner: &str) -> i64 {
        self.store
            .wallet_for_owner(&UserId::new(owner))
            .unwrap()
            .balance
            .minor_units()
    }
}

fn notification(reference: &Reference, amount: i64) -> (String, Vec<u8>) {
    let body = format!(
        r#"{{"event":"charge.success","data":{{"reference":"{reference}","amount":{amount},"status":"success"}}}}"#
    )
    .into_bytes();
    (signature::sign(SECRET.as_bytes(), &body).unwrap(), body)
}

// === Transfers ===

#[test]
fn transfer_moves_funds_and_writes_two_legs() {
    let ledger = Ledger::new();
    ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 5000);

    let receipt = ledger
        .transfers
        .transfer(&UserId::new("a"), &b.wallet_number, Money::from_minor(3000))
        .unwrap();

    assert_eq!(ledger.balance("a"), 2000);
    assert_eq!(ledger.balance("b"), 3000);

    let debit = ledger.store.transaction(&receipt.debit).unwrap();
    let credit = ledger.store.transaction(&receipt.credit).unwrap();
    assert_eq!(debit.kind, TransactionKind::TransferDebit);
    assert_eq!(credit.kind, TransactionKind::TransferCredit);
    assert_eq!(debit.status, TransactionStatus::Success);
    assert_eq!(credit.status, TransactionStatus::Success);
    assert_eq!(debit.counterparty, Some(b.id));
    assert_eq!(credit.owner, UserId::new("b"));
    assert_ne!(receipt.debit, receipt.credit);
}

#[test]
fn insufficient_funds_changes_nothing() {
    let ledger = Ledger::new();
    ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 2000);

    let result = ledger
        .transfers
        .transfer(&UserId::new("a"), &b.wallet_number, Money::from_minor(6000));

    assert_eq!(result, Err(LedgerError::InsufficientFunds));
    assert_eq!(ledger.balance("a"), 2000);
    assert_eq!(ledger.balance("b"), 0);
    assert!(ledger.store.history(&UserId::new("b")).unwrap().is_empty());
}

#[test]
fn self_transfer_is_rejected() {
    let ledger = Ledger::new();
    let a = ledger.open("a");
    ledger.fund("a", 1000);

    let result = ledger
        .transfers
        .transfer(&UserId::new("a"), &a.wallet_number, Money::from_minor(100));

    assert_eq!(result, Err(LedgerError::SelfTransferRejected));
    assert_eq!(ledger.balance("a"), 1000);
}

#[test]
fn unknown_recipient_is_reported() {
    let ledger = Ledger::new();
    ledger.open("a");
    ledger.fund("a", 1000);

    let result = ledger.transfers.transfer(
        &UserId::new("a"),
        &WalletNumber("1234567890123".to_string()),
        Money::from_minor(100),
    );
    assert_eq!(result, Err(LedgerError::RecipientNotFound));
}

#[test]
fn non_positive_amounts_are_rejected() {
    let ledger = Ledger::new();
    ledger.open("a");
    let b = ledger.open("b");
    for amount in [0, -50] {
        assert_eq!(
            ledger
                .transfers
                .transfer(&UserId::new("a"), &b.wallet_number, Money::from_minor(amount)),
            Err(LedgerError::InvalidAmount)
        );
    }
}

#[test]
fn sender_without_wallet_is_not_found() {
    let ledger = Ledger::new();
    let b = ledger.open("b");
    assert_eq!(
        ledger
            .transfers
            .transfer(&UserId::new("ghost"), &b.wallet_number, Money::from_minor(1)),
        Err(LedgerError::WalletNotFound)
    );
}

#[test]
fn concurrent_transfers_conserve_total() {
    let ledger = Arc::new(Ledger::new());
    let a = ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 10_000);
    ledger.fund("b", 10_000);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let (from, to) = if i % 2 == 0 {
                ("a", b.wallet_number.clone())
            } else {
                ("b", a.wallet_number.clone())
            };
            thread::spawn(move || {
                for _ in 0..200 {
                    let _ = ledger
                        .transfers
                        .transfer(&UserId::new(from), &to, Money::from_minor(7));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.balance("a") + ledger.balance("b"), 20_000);
    assert!(ledger.balance("a") >= 0);
    assert!(ledger.balance("b") >= 0);
}

#[test]
fn concurrent_debits_never_overdraw() {
    let ledger = Arc::new(Ledger::new());
    ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 1000);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let to = b.wallet_number.clone();
            thread::spawn(move || {
                ledger
                    .transfers
                    .transfer(&UserId::new("a"), &to, Money::from_minor(300))
                    .is_ok()
            })
        })
        .collect();
    let succeeded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(succeeded, 3);
    assert_eq!(ledger.balance("a"), 100);
    assert_eq!(ledger.balance("b"), 900);
}

// === Deposits ===

#[test]
fn replayed_webhook_credits_exactly_once() {
    let ledger = Ledger::new();
    ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 5000);
    ledger
        .transfers
        .transfer(&UserId::new("a"), &b.wallet_number, Money::from_minor(3000))
        .unwrap();
    assert_eq!(ledger.balance("a"), 2000);

    let reference = ledger.pending_deposit("a", 5000);
    let (sig, body) = notification(&reference, 5000);
    for _ in 0..2 {
        let outcome = ledger.deposits.handle_webhook(&sig, &body).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Settled { .. }));
    }

    assert_eq!(ledger.balance("a"), 7000);
    assert_eq!(
        ledger.store.transaction(&reference).unwrap().status,
        TransactionStatus::Success
    );
}

#[test]
fn concurrent_webhook_deliveries_credit_once() {
    let ledger = Arc::new(Ledger::new());
    ledger.open("a");
    let reference = ledger.pending_deposit("a", 2500);
    let (sig, body) = notification(&reference, 2500);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let (sig, body) = (sig.clone(), body.clone());
            thread::spawn(move || ledger.deposits.handle_webhook(&sig, &body).unwrap())
        })
        .collect();
    let credited = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|outcome| {
            matches!(
                outcome,
                WebhookOutcome::Settled {
                    settlement: Settlement::Credited { .. },
                    ..
                }
            )
        })
        .count();

    assert_eq!(credited, 1);
    assert_eq!(ledger.balance("a"), 2500);
}

#[test]
fn tampered_webhook_is_rejected() {
    let ledger = Ledger::new();
    ledger.open("a");
    let reference = ledger.pending_deposit("a", 5000);
    let (sig, _) = notification(&reference, 5000);
    let (_, forged_body) = notification(&reference, 500_000);

    assert_eq!(
        ledger.deposits.handle_webhook(&sig, &forged_body),
        Err(LedgerError::InvalidSignature)
    );
    assert_eq!(ledger.balance("a"), 0);
}

#[tokio::test]
async fn initiation_records_pending_deposit() {
    let ledger = Ledger::new();
    ledger.open("a");

    let intent = ledger
        .deposits
        .initiate_deposit(&UserId::new("a"), Money::from_minor(5000))
        .await
        .unwrap();

    assert!(intent.checkout_url.ends_with(intent.reference.as_str()));
    let record = ledger
        .deposits
        .deposit_status(&UserId::new("a"), &intent.reference)
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Pending);
    assert_eq!(record.amount, Money::from_minor(5000));
    assert_eq!(ledger.balance("a"), 0);
}

#[tokio::test]
async fn initiation_validates_amount_and_wallet() {
    let ledger = Ledger::new();
    ledger.open("a");
    assert_eq!(
        ledger
            .deposits
            .initiate_deposit(&UserId::new("a"), Money::from_minor(0))
            .await,
        Err(LedgerError::InvalidAmount)
    );
    assert_eq!(
        ledger
            .deposits
            .initiate_deposit(&UserId::new("ghost"), Money::from_minor(10))
            .await,
        Err(LedgerError::WalletNotFound)
    );
}

#[tokio::test]
async fn gateway_failure_leaves_deposit_pending() {
    let ledger = Ledger::with_gateway(Arc::new(DownGateway));
    ledger.open("a");

    let result = ledger
        .deposits
        .initiate_deposit(&UserId::new("a"), Money::from_minor(5000))
        .await;

    assert!(matches!(result, Err(LedgerError::CollaboratorUnavailable(_))));
    let history = ledger.store.history(&UserId::new("a")).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Pending);
    assert_eq!(ledger.balance("a"), 0);
}

#[tokio::test]
async fn verification_settles_through_the_webhook_path() {
    let ledger = Ledger::with_gateway(Arc::new(StubGateway {
        verified: Some((ProviderStatus::Success, 4000)),
    }));
    ledger.open("a");
    let reference = ledger.pending_deposit("a", 4000);

    let record = ledger
        .deposits
        .verify_deposit(&UserId::new("a"), &reference)
        .await
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Success);
    assert_eq!(ledger.balance("a"), 4000);

    // A late webhook for the same reference is acknowledged without a second credit.
    let (sig, body) = notification(&reference, 4000);
    assert_eq!(
        ledger.deposits.handle_webhook(&sig, &body),
        Ok(WebhookOutcome::Settled {
            reference: reference.clone(),
            settlement: Settlement::AlreadyApplied,
        })
    );
    assert_eq!(ledger.balance("a"), 4000);
}

#[tokio::test]
async fn verification_marks_failed_payments() {
    let ledger = Ledger::with_gateway(Arc::new(StubGateway {
        verified: Some((ProviderStatus::Failed, 4000)),
    }));
    ledger.open("a");
    let reference = ledger.pending_deposit("a", 4000);

    let record = ledger
        .deposits
        .verify_deposit(&UserId::new("a"), &reference)
        .await
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Failed);

    let (sig, body) = notification(&reference, 4000);
    assert!(matches!(
        ledger.deposits.handle_webhook(&sig, &body),
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert_eq!(ledger.balance("a"), 0);
}

#[test]
fn history_lists_newest_first_across_kinds() {
    let ledger = Ledger::new();
    ledger.open("a");
    let b = ledger.open("b");
    ledger.fund("a", 5000);
    ledger
        .transfers
        .transfer(&UserId::new("a"), &b.wallet_number, Money::from_minor(1000))
        .unwrap();

    let history = ledger.store.history(&UserId::new("a")).unwrap();
    let kinds: Vec<_> = history.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![TransactionKind::TransferDebit, TransactionKind::Deposit]);

    let history_b = ledger.store.history(&UserId::new("b")).unwrap();
    assert_eq!(history_b.len(), 1);
    assert_eq!(history_b[0].kind, TransactionKind::TransferCredit);
}
