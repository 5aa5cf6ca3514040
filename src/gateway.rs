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

//! Payment provider boundary.
//!
//! The ledger only needs two calls from the provider: open a checkout for a
//! reference, and report what it knows about a reference. Both are black
//! boxes behind [`PaymentGateway`]; [`PaystackGateway`] speaks the Paystack
//! REST API.

use crate::LedgerError;
use crate::base::Reference;
use crate::config::PaystackConfig;
use crate::money::Money;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Request to open a hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub email: String,
    pub amount: Money,
    pub reference: Reference,
}

/// Handle returned by the provider for a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub checkout_url: String,
    pub access_code: Option<String>,
}

/// Provider-side outcome of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Success,
    Failed,
    Pending,
}

impl ProviderStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "success" => Self::Success,
            "failed" | "abandoned" | "reversed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// What the provider reports about a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayment {
    pub reference: Reference,
    pub amount: Money,
    pub status: ProviderStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout for `request.reference`.
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout, LedgerError>;

    /// Looks up the provider's view of a reference.
    async fn verify(&self, reference: &Reference) -> Result<ProviderPayment, LedgerError>;
}

/// Paystack REST client.
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    amount: i64,
    status: String,
}

impl PaystackGateway {
    pub fn new(config: &PaystackConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LedgerError::CollaboratorUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LedgerError> {
        let envelope: Envelope<T> = response.json().await.map_err(unavailable)?;
        if !envelope.status {
            return Err(LedgerError::CollaboratorUnavailable(format!(
                "paystack error: {}",
                envelope.message
            )));
        }
        envelope.data.ok_or_else(|| {
            LedgerError::CollaboratorUnavailable("paystack response without data".to_string())
        })
    }
}

fn unavailable(err: reqwest::Error) -> LedgerError {
    error!(error = %err, "payment provider call failed");
    LedgerError::CollaboratorUnavailable(err.to_string())
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout, LedgerError> {
        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await
            .map_err(unavailable)?;

        let data: InitializeData = Self::unwrap_envelope(response).await?;
        Ok(Checkout {
            checkout_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn verify(&self, reference: &Reference) -> Result<ProviderPayment, LedgerError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(unavailable)?;

        let data: VerifyData = Self::unwrap_envelope(response).await?;
        Ok(ProviderPayment {
            reference: Reference(data.reference),
            amount: Money::from_minor(data.amount),
            status: ProviderStatus::from_provider(&data.status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_map_to_outcomes() {
        assert_eq!(ProviderStatus::from_provider("success"), ProviderStatus::Success);
        assert_eq!(ProviderStatus::from_provider("abandoned"), ProviderStatus::Failed);
        assert_eq!(ProviderStatus::from_provider("failed"), ProviderStatus::Failed);
        assert_eq!(ProviderStatus::from_provider("ongoing"), ProviderStatus::Pending);
    }

    #[test]
    fn checkout_request_serializes_in_provider_shape() {
        let request = CheckoutRequest {
            email: "a@example.com".into(),
            amount: Money::from_minor(5000),
            reference: Reference::from("TXN_1"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["amount"], 5000);
        assert_eq!(json["reference"], "TXN_1");
        assert_eq!(json["email"], "a@example.com");
    }

    #[test]
    fn envelope_failure_parses() {
        let envelope: Envelope<InitializeData> =
            serde_json::from_str(r#"{"status":false,"message":"Invalid key"}"#).unwrap();
        assert!(!envelope.status);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.message, "Invalid key");
    }

    #[test]
    fn gateway_trims_trailing_slash() {
        let config = PaystackConfig {
            secret_key: "sk".into(),
            base_url: "http://localhost:9999/".into(),
            timeout_ms: 100,
        };
        let gateway = PaystackGateway::new(&config).unwrap();
        assert_eq!(gateway.base_url, "http://localhost:9999");
    }
}
