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


//! Customer store.
//!
//! Each customer carries the set of copies they currently hold. The set is a
//! projection of the open transactions in the ledger and is only changed by
//! the [`Engine`](crate::Engine) together with the ledger entry it mirrors.

use crate::LibraryError;
use crate::base::{CopyId, CustomerId, IdSequence};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use validator::Validate;

/// Input for registering a customer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct NewCustomer {
    #[validate(length(min = 1, max = 255, message = "must be 1 to 255 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 255, message = "must be 1 to 255 characters"))]
    pub last_name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

impl NewCustomer {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }

    fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
        }
    }
}

/// Snapshot of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Copies currently checked out to this customer.
    pub borrowed: BTreeSet<CopyId>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Default)]
pub(crate) struct CustomerState {
    borrowed: BTreeSet<CopyId>,
    removed: bool,
}

impl CustomerState {
    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn has_borrowed(&self, copy_id: CopyId) -> bool {
        self.borrowed.contains(&copy_id)
    }

    pub(crate) fn borrowed_count(&self) -> usize {
        self.borrowed.len()
    }

    pub(crate) fn borrow(&mut self, copy_id: CopyId) {
        let inserted = self.borrowed.insert(copy_id);
        debug_assert!(inserted, "Invariant violated: copy {copy_id} borrowed twice");
    }

    pub(crate) fn give_back(&mut self, copy_id: CopyId) {
        let removed = self.borrowed.remove(&copy_id);
        debug_assert!(removed, "Invariant violated: copy {copy_id} was not borrowed");
    }
}

#[derive(Debug)]
pub(crate) struct CustomerEntry {
    id: CustomerId,
    first_name: String,
    last_name: String,
    email: String,
    inner: Mutex<CustomerState>,
}

impl CustomerEntry {
    pub(crate) fn lock(&self) -> MutexGuard<'_, CustomerState> {
        self.inner.lock()
    }

    fn snapshot(&self, state: &CustomerState) -> Customer {
        Customer {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            borrowed: state.borrowed.clone(),
        }
    }
}

/// Concurrent customer store with a case-insensitive email index.
#[derive(Debug, Default)]
pub struct CustomerStore {
    ids: IdSequence,
    customers: DashMap<CustomerId, Arc<CustomerEntry>>,
    /// Lowercased email to owner, for uniqueness.
    emails: DashMap<String, CustomerId>,
}

impl CustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, new_customer: NewCustomer) -> Result<CustomerId, LibraryError> {
        let new_customer = new_customer.normalized();
        new_customer.validate()?;

        // Entry API makes the uniqueness check and the claim one step.
        match self.emails.entry(email_key(&new_customer.email)) {
            Entry::Occupied(_) => Err(LibraryError::DuplicateEmail(new_customer.email)),
            Entry::Vacant(slot) => {
                let id: CustomerId = self
                    .ids
                    .next()
                    .ok_or(LibraryError::IdsExhausted("customer"))?;
                let entry = CustomerEntry {
                    id,
                    first_name: new_customer.first_name,
                    last_name: new_customer.last_name,
                    email: new_customer.email,
                    inner: Mutex::new(CustomerState::default()),
                };
                self.customers.insert(id, Arc::new(entry));
                slot.insert(id);
                Ok(id)
            }
        }
    }

    /// Removes a customer. Caller holds the customer lock and has checked
    /// that nothing is on loan.
    pub(crate) fn detach(&self, customer: &CustomerEntry, state: &mut CustomerState) {
        state.removed = true;
        self.customers.remove(&customer.id);
        self.emails.remove(&email_key(&customer.email));
    }

    pub(crate) fn entry(&self, id: CustomerId) -> Result<Arc<CustomerEntry>, LibraryError> {
        self.customers
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LibraryError::CustomerNotFound(id))
    }

    pub fn get(&self, id: CustomerId) -> Result<Customer, LibraryError> {
        let entry = self.entry(id)?;
        let state = entry.lock();
        if state.removed {
            return Err(LibraryError::CustomerNotFound(id));
        }
        Ok(entry.snapshot(&state))
    }

    pub fn find_by_email(&self, email: &str) -> Option<Customer> {
        let id = *self.emails.get(&email_key(email))?;
        self.get(id).ok()
    }

    /// All customers in ascending id order.
    pub fn all(&self) -> Vec<Customer> {
        let handles: Vec<Arc<CustomerEntry>> =
            self.customers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut customers: Vec<Customer> = handles
            .iter()
            .filter_map(|entry| {
                let state = entry.lock();
                (!state.removed).then(|| entry.snapshot(&state))
            })
            .collect();
        customers.sort_by_key(|customer| customer.id);
        customers
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}
