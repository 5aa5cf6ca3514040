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

//! HTTP surface.
//!
//! | Method | Path | Auth | Permission |
//! |--------|------|------|------------|
//! | `GET`  | `/health` | - | - |
//! | `POST` | `/wallet/paystack/webhook` | signature | - |
//! | `POST` | `/wallet/deposit` | yes | `deposit` |
//! | `GET`  | `/wallet/deposit/{reference}/status` | yes | - |
//! | `POST` | `/wallet/deposit/{reference}/verify` | yes | `deposit` |
//! | `GET`  | `/wallet/balance` | yes | `read` |
//! | `GET`  | `/wallet/transactions` | yes | `read` |
//! | `POST` | `/wallet/transfer` | yes | `transfer` |
//!
//! Authenticated `POST`s honour the `X-Idempotency-Key` header.

pub mod error;
pub mod handlers;
pub mod middleware;

use crate::config::Config;
use crate::credential::CredentialResolver;
use crate::deposit::DepositReconciler;
use crate::gateway::PaymentGateway;
use crate::idempotency::{IdempotencyCache, InMemoryIdempotencyStore};
use crate::rate_guard::RateGuard;
use crate::store::LedgerStore;
use crate::transfer::TransferEngine;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;

pub use error::{AppError, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LedgerStore>,
    pub transfers: TransferEngine,
    pub deposits: DepositReconciler,
    pub credentials: Arc<dyn CredentialResolver>,
    pub rate_guard: RateGuard,
    pub idempotency: Arc<IdempotencyCache>,
}

impl AppState {
    pub fn new(
        store: Arc<LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        credentials: Arc<dyn CredentialResolver>,
        config: &Config,
    ) -> Self {
        let idempotency = IdempotencyCache::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            config.idempotency.ttl(),
        );
        Self {
            transfers: TransferEngine::new(Arc::clone(&store)),
            deposits: DepositReconciler::new(
                Arc::clone(&store),
                gateway,
                config.paystack.secret_key.as_bytes(),
            ),
            store,
            credentials,
            rate_guard: RateGuard::from_config(&config.rate_limit),
            idempotency: Arc::new(idempotency),
        }
    }
}

pub fn router(state: AppState) -> Router {
    // Layers run outermost-last: authenticate, then rate-limit, then idempotency.
    let wallet = Router::new()
        .route("/wallet/deposit", post(handlers::initiate_deposit))
        .route(
            "/wallet/deposit/{reference}/status",
            get(handlers::deposit_status),
        )
        .route(
            "/wallet/deposit/{reference}/verify",
            post(handlers::verify_deposit),
        )
        .route("/wallet/balance", get(handlers::balance))
        .route("/wallet/transactions", get(handlers::transactions))
        .route("/wallet/transfer", post(handlers::transfer))
        .layer(from_fn_with_state(state.clone(), middleware::idempotency))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/wallet/paystack/webhook", post(handlers::paystack_webhook))
        .merge(wallet)
        .with_state(state)
}
