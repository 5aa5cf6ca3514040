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

//! Fixed-point money in minor currency units.
//!
//! All balances and amounts are integers (e.g. kobo). There is no floating
//! point anywhere in the ledger; [`Money::to_major`] exists only for display.
//!
//! # Example
//!
//! ```
//! use wallet_ledger::Money;
//!
//! let amount = Money::positive(5000).unwrap();
//! assert_eq!(amount.minor_units(), 5000);
//! assert_eq!(amount.to_string(), "50.00");
//! ```

use crate::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of money in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Number of minor units per major unit.
    const MINOR_DIGITS: u32 = 2;

    pub const fn from_minor(units: i64) -> Self {
        Money(units)
    }

    /// Validates a request amount: it must be strictly positive.
    pub fn positive(units: i64) -> Result<Self, LedgerError> {
        if units <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(Money(units))
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Applies a signed delta, failing on overflow.
    pub fn checked_apply(self, delta: i64) -> Option<Money> {
        self.0.checked_add(delta).map(Money)
    }

    /// Major-unit rendering, e.g. `5000` minor units as `50.00`.
    pub fn to_major(self) -> Decimal {
        Decimal::new(self.0, Self::MINOR_DIGITS)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}
