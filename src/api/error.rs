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

use crate::LedgerError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// A [`LedgerError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct AppError {
    error: LedgerError,
    status: StatusCode,
}

impl AppError {
    /// Error on the provider notification path.
    ///
    /// The provider only distinguishes bad signatures (401), unreadable
    /// bodies (400), and processing failures (500), so everything else is
    /// reported as a processing failure.
    pub fn webhook(error: LedgerError) -> Self {
        let status = match error {
            LedgerError::InvalidSignature => StatusCode::UNAUTHORIZED,
            LedgerError::MalformedPayload(_) | LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { error, status }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LedgerError> for AppError {
    fn from(error: LedgerError) -> Self {
        let status = status_of(&error);
        Self { error, status }
    }
}

pub fn status_of(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::InvalidAmount
        | LedgerError::Validation(_)
        | LedgerError::MalformedPayload(_)
        | LedgerError::InsufficientFunds
        | LedgerError::SelfTransferRejected => StatusCode::BAD_REQUEST,
        LedgerError::WalletNotFound
        | LedgerError::RecipientNotFound
        | LedgerError::TransactionNotFound => StatusCode::NOT_FOUND,
        LedgerError::InvalidSignature | LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
        LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
        LedgerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        LedgerError::StoreConflict
        | LedgerError::DuplicateReference
        | LedgerError::DuplicateWallet
        | LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LedgerError::AmountMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::CollaboratorUnavailable(_) => StatusCode::BAD_GATEWAY,
    }
}

pub fn code_of(error: &LedgerError) -> &'static str {
    match error {
        LedgerError::InvalidAmount => "INVALID_AMOUNT",
        LedgerError::Validation(_) => "VALIDATION_ERROR",
        LedgerError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
        LedgerError::InsufficientFunds => "INSUFFICIENT_FUNDS",
        LedgerError::SelfTransferRejected => "SELF_TRANSFER",
        LedgerError::WalletNotFound => "WALLET_NOT_FOUND",
        LedgerError::RecipientNotFound => "RECIPIENT_NOT_FOUND",
        LedgerError::TransactionNotFound => "TRANSACTION_NOT_FOUND",
        LedgerError::InvalidSignature => "INVALID_SIGNATURE",
        LedgerError::Unauthorized => "UNAUTHORIZED",
        LedgerError::Forbidden(_) => "FORBIDDEN",
        LedgerError::RateLimited => "RATE_LIMITED",
        LedgerError::StoreConflict => "STORE_CONFLICT",
        LedgerError::DuplicateReference => "DUPLICATE_REFERENCE",
        LedgerError::DuplicateWallet => "DUPLICATE_WALLET",
        LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
        LedgerError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
        LedgerError::CollaboratorUnavailable(_) => "COLLABORATOR_UNAVAILABLE",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.error.to_string(),
                code: code_of(&self.error).to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Permission;

    #[test]
    fn business_rule_violations_are_bad_requests() {
        for error in [
            LedgerError::InvalidAmount,
            LedgerError::InsufficientFunds,
            LedgerError::SelfTransferRejected,
        ] {
            assert_eq!(AppError::from(error).status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn auth_failures_map_to_401_403_429() {
        assert_eq!(AppError::from(LedgerError::Unauthorized).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(LedgerError::Forbidden(Permission::Read)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(LedgerError::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn collaborator_failure_is_bad_gateway() {
        assert_eq!(
            AppError::from(LedgerError::CollaboratorUnavailable("timeout".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn webhook_collapses_processing_failures_to_500() {
        assert_eq!(
            AppError::webhook(LedgerError::InvalidSignature).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::webhook(LedgerError::MalformedPayload("eof".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::webhook(LedgerError::TransactionNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::webhook(LedgerError::StoreConflict).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
