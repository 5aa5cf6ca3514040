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

//! HMAC-SHA512 tags for provider notifications.
//!
//! The provider signs the raw request body with the shared secret and sends
//! the hex-encoded tag in a header.

use crate::LedgerError;
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Computes the hex-encoded HMAC-SHA512 tag of `payload`.
pub fn sign(secret: &[u8], payload: &[u8]) -> Result<String, LedgerError> {
    let mut mac = HmacSha512::new_from_slice(secret)
        .map_err(|_| LedgerError::Validation("unusable signing key".to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex-encoded tag in constant time.
pub fn verify(secret: &[u8], payload: &[u8], signature: &str) -> Result<(), LedgerError> {
    let tag = hex::decode(signature.trim()).map_err(|_| LedgerError::InvalidSignature)?;
    let mut mac =
        HmacSha512::new_from_slice(secret).map_err(|_| LedgerError::InvalidSignature)?;
    mac.update(payload);
    mac.verify_slice(&tag).map_err(|_| LedgerError::InvalidSignature)
}
