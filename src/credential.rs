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

//! Caller credentials and permission checks.
//!
//! A caller presents either a session bearer token or an API key. Session
//! tokens carry every permission. API keys carry an explicit permission set,
//! an expiry, and an active flag; only the SHA-256 digest of a key's secret
//! is stored.

use crate::LedgerError;
use crate::base::{KeyId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Deposit,
    Transfer,
    Read,
}

impl Permission {
    pub const ALL: [Permission; 3] = [Permission::Deposit, Permission::Transfer, Permission::Read];
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::Transfer => "transfer",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

impl FromStr for Permission {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(Self::Deposit),
            "transfer" => Ok(Self::Transfer),
            "read" => Ok(Self::Read),
            other => Err(LedgerError::Validation(format!("unknown permission '{other}'"))),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer {
        user_id: UserId,
    },
    ApiKey {
        user_id: UserId,
        key_id: KeyId,
        permissions: Vec<Permission>,
        expires_at: DateTime<Utc>,
    },
}

impl Credential {
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Bearer { user_id } | Self::ApiKey { user_id, .. } => user_id,
        }
    }

    pub fn key_id(&self) -> Option<&KeyId> {
        match self {
            Self::Bearer { .. } => None,
            Self::ApiKey { key_id, .. } => Some(key_id),
        }
    }
}

/// Checks that `credential` may perform an operation requiring `permission`.
///
/// # Errors
///
/// - [`LedgerError::Unauthorized`] - the API key expired.
/// - [`LedgerError::Forbidden`] - the API key lacks `permission`.
pub fn authorize(
    credential: &Credential,
    permission: Permission,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    match credential {
        Credential::Bearer { .. } => Ok(()),
        Credential::ApiKey {
            permissions,
            expires_at,
            ..
        } => {
            if *expires_at <= now {
                return Err(LedgerError::Unauthorized);
            }
            if !permissions.contains(&permission) {
                return Err(LedgerError::Forbidden(permission));
            }
            Ok(())
        }
    }
}

/// A stored API key. The secret itself is never kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: KeyId,
    pub owner: UserId,
    pub secret_hash: String,
    pub permissions: Vec<Permission>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl ApiKeyRecord {
    fn credential(&self) -> Credential {
        Credential::ApiKey {
            user_id: self.owner.clone(),
            key_id: self.id.clone(),
            permissions: self.permissions.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Hex-encoded SHA-256 digest of an API key secret.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Maps presented tokens to credentials.
pub trait CredentialResolver: Send + Sync {
    fn resolve_bearer(&self, token: &str) -> Result<Credential, LedgerError>;

    fn resolve_api_key(&self, secret: &str, now: DateTime<Utc>) -> Result<Credential, LedgerError>;
}

/// In-memory session tokens and API keys.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    sessions: DashMap<String, UserId>,
    keys: DashMap<String, ApiKeyRecord>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_session(&self, token: impl Into<String>, user_id: UserId) {
        self.sessions.insert(token.into(), user_id);
    }

    /// Stores a key under the digest of `secret` and returns its id.
    pub fn issue_api_key(
        &self,
        owner: UserId,
        secret: &str,
        permissions: Vec<Permission>,
        expires_at: DateTime<Utc>,
        active: bool,
    ) -> Result<KeyId, LedgerError> {
        if secret.is_empty() {
            return Err(LedgerError::Validation("empty api key secret".to_string()));
        }
        let secret_hash = hash_secret(secret);
        if self.keys.contains_key(&secret_hash) {
            return Err(LedgerError::Validation("api key already registered".to_string()));
        }
        let id = KeyId(Uuid::new_v4().to_string());
        info!(owner = %owner, key_id = %id, "api key issued");
        self.keys.insert(
            secret_hash.clone(),
            ApiKeyRecord {
                id: id.clone(),
                owner,
                secret_hash,
                permissions,
                expires_at,
                active,
            },
        );
        Ok(id)
    }
}

impl CredentialResolver for InMemoryCredentials {
    fn resolve_bearer(&self, token: &str) -> Result<Credential, LedgerError> {
        let user_id = self
            .sessions
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::Unauthorized)?;
        Ok(Credential::Bearer { user_id })
    }

    fn resolve_api_key(&self, secret: &str, now: DateTime<Utc>) -> Result<Credential, LedgerError> {
        let record = self
            .keys
            .get(&hash_secret(secret))
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::Unauthorized)?;
        if !record.active || record.expires_at <= now {
            debug!(key_id = %record.id, active = record.active, "api key rejected");
            return Err(LedgerError::Unauthorized);
        }
        Ok(record.credential())
    }
}
