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

use super::AppState;
use super::error::AppError;
use crate::LedgerError;
use crate::base::{Reference, WalletNumber};
use crate::credential::{Credential, Permission, authorize};
use crate::deposit::WebhookOutcome;
use crate::money::Money;
use crate::transaction::{TransactionKind, TransactionRecord, TransactionStatus};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

// === DTOs ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositResponse {
    pub reference: Reference,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositStatusResponse {
    pub reference: Reference,
    pub status: TransactionStatus,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub reference: Reference,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionRecord> for TransactionView {
    fn from(record: TransactionRecord) -> Self {
        Self {
            kind: record.kind,
            amount: record.amount,
            status: record.status,
            reference: record.reference,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub wallet_number: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub status: String,
    pub message: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, LedgerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| LedgerError::Validation(rejection.body_text()))
}

// === Handlers ===

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn initiate_deposit(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<Json<DepositResponse>, AppError> {
    authorize(&credential, Permission::Deposit, Utc::now())?;
    let request = body(payload)?;
    let amount = Money::positive(request.amount)?;

    let intent = state
        .deposits
        .initiate_deposit(credential.user_id(), amount)
        .await?;
    Ok(Json(DepositResponse {
        reference: intent.reference,
        checkout_url: intent.checkout_url,
    }))
}

/// Provider notification endpoint. Unauthenticated; the body signature is
/// the only proof of origin.
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            warn!("provider notification without signature header");
            AppError::webhook(LedgerError::Validation(format!(
                "missing {SIGNATURE_HEADER} header"
            )))
        })?;

    match state.deposits.handle_webhook(signature, &payload) {
        Ok(WebhookOutcome::Settled { .. }) | Ok(WebhookOutcome::Ignored { .. }) => {
            Ok(Json(json!({ "status": true })))
        }
        Err(err) => Err(AppError::webhook(err)),
    }
}

pub async fn deposit_status(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(reference): Path<String>,
) -> Result<Json<DepositStatusResponse>, AppError> {
    let record = state
        .deposits
        .deposit_status(credential.user_id(), &Reference(reference))?;
    Ok(Json(DepositStatusResponse {
        reference: record.reference,
        status: record.status,
        amount: record.amount,
    }))
}

/// Asks the provider about a deposit whose notification never arrived.
pub async fn verify_deposit(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(reference): Path<String>,
) -> Result<Json<DepositStatusResponse>, AppError> {
    authorize(&credential, Permission::Deposit, Utc::now())?;
    let record = state
        .deposits
        .verify_deposit(credential.user_id(), &Reference(reference))
        .await?;
    Ok(Json(DepositStatusResponse {
        reference: record.reference,
        status: record.status,
        amount: record.amount,
    }))
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
) -> Result<Json<BalanceResponse>, AppError> {
    authorize(&credential, Permission::Read, Utc::now())?;
    let wallet = state
        .store
        .wallet_for_owner(credential.user_id())
        .ok_or(LedgerError::WalletNotFound)?;
    Ok(Json(BalanceResponse {
        balance: wallet.balance,
    }))
}

pub async fn transactions(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    authorize(&credential, Permission::Read, Utc::now())?;
    let history = state.store.history(credential.user_id())?;
    Ok(Json(history.into_iter().map(TransactionView::from).collect()))
}

pub async fn transfer(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<TransferResponse>, AppError> {
    authorize(&credential, Permission::Transfer, Utc::now())?;
    let request = body(payload)?;
    let amount = Money::positive(request.amount)?;
    let number = request.wallet_number.trim();
    if number.is_empty() {
        return Err(LedgerError::Validation("walletNumber is required".to_string()).into());
    }

    state
        .transfers
        .transfer(credential.user_id(), &WalletNumber(number.to_string()), amount)?;
    Ok(Json(TransferResponse {
        status: "success".to_string(),
        message: "Transfer completed".to_string(),
    }))
}
