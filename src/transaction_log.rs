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

//! Thread-safe, append-only transaction log keyed by reference.
//!
//! Records are never deleted by ledger operations; only their status moves
//! forward. The one exception is [`TransactionLog::discard`], which the store
//! uses to roll back inserts of an atomic unit that failed to commit.

use crate::LedgerError;
use crate::base::Reference;
use crate::transaction::{TransactionRecord, TransactionStatus};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A thread-safe transaction log with duplicate-reference detection.
#[derive(Debug, Default)]
pub struct TransactionLog {
    records: DashMap<Reference, TransactionRecord>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateReference`] if a record with the same
    /// reference already exists.
    pub(crate) fn insert(&self, record: TransactionRecord) -> Result<(), LedgerError> {
        // Entry API gives an atomic check-and-insert.
        match self.records.entry(record.reference.clone()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateReference),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    /// Advances a record's status through the state machine.
    pub(crate) fn advance(
        &self,
        reference: &Reference,
        to: TransactionStatus,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut record = self
            .records
            .get_mut(reference)
            .ok_or(LedgerError::TransactionNotFound)?;
        record.status = record.status.transition(to)?;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    pub(crate) fn discard(&self, reference: &Reference) {
        self.records.remove(reference);
    }

    pub fn get(&self, reference: &Reference) -> Option<TransactionRecord> {
        self.records.get(reference).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
