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


//! Transaction ledger.
//!
//! The ledger is the authoritative custody history. Entries are appended by
//! checkout and closed once by return; nothing is ever deleted. A per-copy
//! index of open transactions enforces that a copy has at most one open
//! transaction at any time.

use crate::LibraryError;
use crate::base::{CopyId, CustomerId, IdSequence, TransactionId};
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Thread-safe, append-mostly transaction log.
///
/// Mutations for a given copy are only issued while that copy's lock is
/// held, so the open index and the log never diverge for that copy.
#[derive(Debug, Default)]
pub struct Ledger {
    ids: IdSequence,
    /// Every transaction ever recorded, by id.
    transactions: DashMap<TransactionId, Transaction>,
    /// The open transaction of each checked-out copy.
    open_by_copy: DashMap<CopyId, TransactionId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvariantViolation`] if the copy already has
    /// an open transaction.
    pub(crate) fn open(
        &self,
        copy_id: CopyId,
        customer_id: CustomerId,
        at: DateTime<Utc>,
    ) -> Result<TransactionId, LibraryError> {
        match self.open_by_copy.entry(copy_id) {
            Entry::Occupied(entry) => Err(LibraryError::InvariantViolation(format!(
                "copy {copy_id} already has open transaction {}",
                entry.get()
            ))),
            Entry::Vacant(slot) => {
                let id: TransactionId = self
                    .ids
                    .next()
                    .ok_or(LibraryError::IdsExhausted("transaction"))?;
                self.transactions
                    .insert(id, Transaction::open(id, copy_id, customer_id, at));
                slot.insert(id);
                Ok(id)
            }
        }
    }

    /// Sets the return timestamp of an open transaction.
    ///
    /// A return is never stamped before its checkout: a request that read
    /// the clock before a racing checkout won the copy lock is recorded at
    /// the checkout time instead.
    pub(crate) fn close(
        &self,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<Transaction, LibraryError> {
        let closed = {
            let mut tx = self
                .transactions
                .get_mut(&id)
                .ok_or(LibraryError::TransactionNotFound(id))?;
            if !tx.is_open() {
                return Err(LibraryError::NoOpenTransaction {
                    copy: tx.copy_id,
                    customer: tx.customer_id,
                });
            }
            tx.returned_at = Some(at.max(tx.checked_out_at));
            *tx
        };
        self.open_by_copy
            .remove_if(&closed.copy_id, |_, open| *open == id);
        Ok(closed)
    }

    pub fn get(&self, id: TransactionId) -> Result<Transaction, LibraryError> {
        self.transactions
            .get(&id)
            .map(|tx| *tx)
            .ok_or(LibraryError::TransactionNotFound(id))
    }

    /// The open transaction referencing `copy_id`, if any.
    pub fn open_for_copy(&self, copy_id: CopyId) -> Option<Transaction> {
        let id = *self.open_by_copy.get(&copy_id)?;
        self.get(id).ok().filter(Transaction::is_open)
    }

    /// Open transactions of one customer in ascending id order.
    pub fn open_for_customer(&self, customer_id: CustomerId) -> Vec<Transaction> {
        self.filtered(|tx| tx.customer_id == customer_id && tx.is_open())
    }

    /// Every transaction that referenced `copy_id`, oldest first.
    pub fn history_for_copy(&self, copy_id: CopyId) -> Vec<Transaction> {
        self.filtered(|tx| tx.copy_id == copy_id)
    }

    /// Every transaction of one customer, oldest first.
    pub fn history_for_customer(&self, customer_id: CustomerId) -> Vec<Transaction> {
        self.filtered(|tx| tx.customer_id == customer_id)
    }

    /// The whole ledger in insertion order.
    pub fn all(&self) -> Vec<Transaction> {
        self.filtered(|_| true)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.open_by_copy.len()
    }

    // Ids are allocated monotonically, so id order is insertion order.
    fn filtered(&self, predicate: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let mut found: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| *entry.value())
            .filter(|tx| predicate(tx))
            .collect();
        found.sort_by_key(|tx| tx.id);
        found
    }
}
