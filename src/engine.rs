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


//! Circulation engine.
//!
//! The [`Engine`] owns the catalog, the customer store and the ledger and is
//! the only component allowed to mutate circulation state. It keeps three
//! records in step:
//!
//! - the ledger's open transaction for a copy,
//! - the copy's `available` flag,
//! - the borrowing customer's set of held copies.
//!
//! # Operations
//!
//! - **Checkout**: opens a transaction, marks the copy unavailable and adds
//!   it to the customer's borrowed set.
//! - **Return**: closes the open transaction, marks the copy available and
//!   removes it from the borrowed set.
//! - **Deletion**: copies, books and customers can be removed only while
//!   nothing they own or hold is on loan.
//!
//! # Thread Safety
//!
//! Each copy has its own lock, so operations on different copies run in
//! parallel while checkout, return and deletion of one copy are serialized.
//! Locks are always taken in the order book, copies (ascending id), customer.
//! Every fallible check runs before the first write, so a rejected operation
//! leaves no trace.

use crate::base::{BookId, CopyId, CustomerId, TransactionId};
use crate::catalog::{Book, BookCopy, BookQuery, Catalog, NewBook};
use crate::context::RequestContext;
use crate::customer::{Customer, CustomerStore, NewCustomer};
use crate::ledger::Ledger;
use crate::transaction::Transaction;
use crate::LibraryError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// A copy a customer can hand back, as offered by a return form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnableCopy {
    pub copy_id: CopyId,
    pub title: String,
    pub sequence: u32,
}

/// Circulation engine over in-memory stores.
///
/// # Invariants
///
/// - A copy is unavailable if and only if an open transaction references it.
/// - A copy has at most one open transaction.
/// - A customer's borrowed set equals the copies of their open transactions.
/// - Transactions are never deleted and are closed at most once.
#[derive(Debug, Default)]
pub struct Engine {
    catalog: Catalog,
    customers: CustomerStore,
    ledger: Ledger,
}

impl Engine {
    /// Creates an engine with empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn customers(&self) -> &CustomerStore {
        &self.customers
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // === Administration ===

    pub fn add_book(&self, ctx: &RequestContext, book: NewBook) -> Result<BookId, LibraryError> {
        let id = self.catalog.insert_book(book)?;
        info!(actor = ctx.actor(), book = %id, "book added");
        Ok(id)
    }

    /// Adds a copy of `book_id`, numbered one past the book's highest copy.
    pub fn add_copy(&self, ctx: &RequestContext, book_id: BookId) -> Result<CopyId, LibraryError> {
        let id = self.catalog.insert_copy(book_id)?;
        info!(actor = ctx.actor(), book = %book_id, copy = %id, "copy added");
        Ok(id)
    }

    pub fn add_customer(
        &self,
        ctx: &RequestContext,
        customer: NewCustomer,
    ) -> Result<CustomerId, LibraryError> {
        let id = self.customers.insert(customer)?;
        info!(actor = ctx.actor(), customer = %id, "customer added");
        Ok(id)
    }

    /// Deletes a copy that is not checked out.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::CopyNotFound`] - No such copy.
    /// - [`LibraryError::CopyInUse`] - The copy has an open transaction.
    pub fn delete_copy(&self, ctx: &RequestContext, copy_id: CopyId) -> Result<(), LibraryError> {
        let copy = self.catalog.copy_entry(copy_id)?;
        // The book goes away only after all its copies, so a missing book
        // means the copy is gone as well.
        let book = self
            .catalog
            .book_entry(copy.book_id())
            .map_err(|_| LibraryError::CopyNotFound(copy_id))?;

        let mut book_state = book.lock();
        let mut copy_state = copy.lock();
        if copy_state.is_removed() {
            return Err(LibraryError::CopyNotFound(copy_id));
        }
        self.ensure_not_in_use(copy_id, copy_state.is_available())?;

        self.catalog
            .detach_copy(&mut book_state, &copy, &mut copy_state);
        info!(actor = ctx.actor(), copy = %copy_id, "copy deleted");
        Ok(())
    }

    /// Deletes a book together with all of its copies.
    ///
    /// Nothing is deleted if any copy is checked out.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::BookNotFound`] - No such book.
    /// - [`LibraryError::CopyInUse`] - A copy of the book has an open transaction.
    pub fn delete_book(&self, ctx: &RequestContext, book_id: BookId) -> Result<(), LibraryError> {
        let book = self.catalog.book_entry(book_id)?;
        let mut book_state = book.lock();
        if book_state.is_removed() {
            return Err(LibraryError::BookNotFound(book_id));
        }

        // Copies cannot be added or removed while the book lock is held.
        let copies = book_state
            .copy_ids()
            .into_iter()
            .map(|id| self.catalog.copy_entry(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guards: Vec<_> = copies.iter().map(|copy| copy.lock()).collect();

        for (copy, state) in copies.iter().zip(guards.iter()) {
            self.ensure_not_in_use(copy.id(), state.is_available())?;
        }

        for (copy, state) in copies.iter().zip(guards.iter_mut()) {
            self.catalog.detach_copy(&mut book_state, copy, state);
        }
        self.catalog.detach_book(&book, &mut book_state);
        info!(
            actor = ctx.actor(),
            book = %book_id,
            copies = copies.len(),
            "book deleted"
        );
        Ok(())
    }

    /// Deletes a customer who holds nothing.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::CustomerNotFound`] - No such customer.
    /// - [`LibraryError::CustomerHasOpenLoans`] - The customer has an open transaction.
    pub fn delete_customer(
        &self,
        ctx: &RequestContext,
        customer_id: CustomerId,
    ) -> Result<(), LibraryError> {
        let customer = self.customers.entry(customer_id)?;
        let mut state = customer.lock();
        if state.is_removed() {
            return Err(LibraryError::CustomerNotFound(customer_id));
        }

        // Checkout and return take the customer lock before writing, so the
        // ledger cannot change for this customer while we hold it.
        if !self.ledger.open_for_customer(customer_id).is_empty() {
            warn!(actor = ctx.actor(), customer = %customer_id, "delete rejected: open loans");
            return Err(LibraryError::CustomerHasOpenLoans(customer_id));
        }
        if state.borrowed_count() > 0 {
            return Err(LibraryError::InvariantViolation(format!(
                "customer {customer_id} holds {} copies without open transactions",
                state.borrowed_count()
            )));
        }

        self.customers.detach(&customer, &mut state);
        info!(actor = ctx.actor(), customer = %customer_id, "customer deleted");
        Ok(())
    }

    // === Circulation ===

    /// Checks a copy out to a customer.
    ///
    /// Opens a transaction stamped with the request time, marks the copy
    /// unavailable and records it in the customer's borrowed set, all under
    /// the copy's lock.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::CopyNotFound`] - No such copy.
    /// - [`LibraryError::CustomerNotFound`] - No such customer.
    /// - [`LibraryError::CopyUnavailable`] - The copy is already checked out.
    /// - [`LibraryError::InvariantViolation`] - The copy is flagged available
    ///   but the ledger has an open transaction for it.
    pub fn checkout(
        &self,
        ctx: &RequestContext,
        copy_id: CopyId,
        customer_id: CustomerId,
    ) -> Result<TransactionId, LibraryError> {
        let copy = self.catalog.copy_entry(copy_id)?;
        let customer = self.customers.entry(customer_id)?;

        let mut copy_state = copy.lock();
        if copy_state.is_removed() {
            return Err(LibraryError::CopyNotFound(copy_id));
        }
        let mut customer_state = customer.lock();
        if customer_state.is_removed() {
            return Err(LibraryError::CustomerNotFound(customer_id));
        }

        if !copy_state.is_available() {
            warn!(
                actor = ctx.actor(),
                copy = %copy_id,
                customer = %customer_id,
                "checkout rejected: copy unavailable"
            );
            return Err(LibraryError::CopyUnavailable(copy_id));
        }
        if let Some(open) = self.ledger.open_for_copy(copy_id) {
            return Err(LibraryError::InvariantViolation(format!(
                "copy {copy_id} is flagged available but transaction {} is open",
                open.id
            )));
        }
        if customer_state.has_borrowed(copy_id) {
            return Err(LibraryError::InvariantViolation(format!(
                "customer {customer_id} holds copy {copy_id} without an open transaction"
            )));
        }

        // Nothing below can fail: the copy lock guarantees the ledger has no
        // open entry for this copy.
        let transaction_id = self.ledger.open(copy_id, customer_id, ctx.now())?;
        copy_state.check_out();
        customer_state.borrow(copy_id);

        info!(
            actor = ctx.actor(),
            copy = %copy_id,
            customer = %customer_id,
            transaction = %transaction_id,
            "copy checked out"
        );
        Ok(transaction_id)
    }

    /// Returns a copy checked out by a customer.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::CopyNotFound`] - No such copy.
    /// - [`LibraryError::CustomerNotFound`] - No such customer.
    /// - [`LibraryError::NoOpenTransaction`] - The copy is not checked out to
    ///   this customer (never checked out, held by someone else, or already
    ///   returned).
    /// - [`LibraryError::InvariantViolation`] - The ledger and the copy or
    ///   customer projections disagree.
    pub fn return_book(
        &self,
        ctx: &RequestContext,
        copy_id: CopyId,
        customer_id: CustomerId,
    ) -> Result<TransactionId, LibraryError> {
        let copy = self.catalog.copy_entry(copy_id)?;
        let customer = self.customers.entry(customer_id)?;

        let mut copy_state = copy.lock();
        if copy_state.is_removed() {
            return Err(LibraryError::CopyNotFound(copy_id));
        }
        let mut customer_state = customer.lock();
        if customer_state.is_removed() {
            return Err(LibraryError::CustomerNotFound(customer_id));
        }

        let Some(open) = self
            .ledger
            .open_for_copy(copy_id)
            .filter(|tx| tx.customer_id == customer_id)
        else {
            warn!(
                actor = ctx.actor(),
                copy = %copy_id,
                customer = %customer_id,
                "return rejected: no open transaction"
            );
            return Err(LibraryError::NoOpenTransaction {
                copy: copy_id,
                customer: customer_id,
            });
        };
        if copy_state.is_available() {
            return Err(LibraryError::InvariantViolation(format!(
                "copy {copy_id} is flagged available but transaction {} is open",
                open.id
            )));
        }
        if !customer_state.has_borrowed(copy_id) {
            return Err(LibraryError::InvariantViolation(format!(
                "transaction {} is open but customer {customer_id} does not hold copy {copy_id}",
                open.id
            )));
        }

        self.ledger.close(open.id, ctx.now())?;
        copy_state.check_in();
        customer_state.give_back(copy_id);

        info!(
            actor = ctx.actor(),
            copy = %copy_id,
            customer = %customer_id,
            transaction = %open.id,
            "copy returned"
        );
        Ok(open.id)
    }

    // === Queries ===

    /// Copies a customer can return right now.
    ///
    /// Yields one entry per open transaction of the customer whose copy is
    /// flagged unavailable, in transaction order. The iterator resolves
    /// titles lazily and can be cloned to restart it.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::CustomerNotFound`] - No such customer.
    pub fn open_transactions_for(
        &self,
        customer_id: CustomerId,
    ) -> Result<impl Iterator<Item = ReturnableCopy> + Clone + '_, LibraryError> {
        self.customers.get(customer_id)?;
        let open: Vec<Transaction> = self.ledger.open_for_customer(customer_id);
        debug!(customer = %customer_id, open = open.len(), "listing returnable copies");

        Ok(open
            .into_iter()
            .filter_map(move |tx| self.returnable(&tx)))
    }

    fn returnable(&self, tx: &Transaction) -> Option<ReturnableCopy> {
        let copy = match self.catalog.copy(tx.copy_id) {
            Ok(copy) => copy,
            Err(_) => {
                warn!(transaction = %tx.id, copy = %tx.copy_id, "open transaction references missing copy");
                return None;
            }
        };
        if copy.available {
            warn!(transaction = %tx.id, copy = %tx.copy_id, "open transaction on a copy flagged available");
            return None;
        }
        let title = self.catalog.book(copy.book_id).ok()?.title;
        Some(ReturnableCopy {
            copy_id: copy.id,
            title,
            sequence: copy.sequence,
        })
    }

    pub fn book(&self, id: BookId) -> Result<Book, LibraryError> {
        self.catalog.book(id)
    }

    pub fn copy(&self, id: CopyId) -> Result<BookCopy, LibraryError> {
        self.catalog.copy(id)
    }

    pub fn customer(&self, id: CustomerId) -> Result<Customer, LibraryError> {
        self.customers.get(id)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Transaction, LibraryError> {
        self.ledger.get(id)
    }

    pub fn search_books(&self, query: &BookQuery) -> Vec<Book> {
        self.catalog.search(query)
    }

    /// Custody history of a copy, oldest first.
    pub fn history_for_copy(&self, copy_id: CopyId) -> Result<Vec<Transaction>, LibraryError> {
        self.catalog.copy(copy_id)?;
        Ok(self.ledger.history_for_copy(copy_id))
    }

    /// Verifies that the ledger and its projections agree.
    ///
    /// Intended for quiescent engines (tests, end of a batch run); concurrent
    /// mutations can make a snapshot look inconsistent.
    ///
    /// # Errors
    ///
    /// Returns the first disagreement found as
    /// [`LibraryError::InvariantViolation`].
    pub fn check_consistency(&self) -> Result<(), LibraryError> {
        let violation = |message: String| -> Result<(), LibraryError> {
            warn!(reason = %message, "consistency check failed");
            Err(LibraryError::InvariantViolation(message))
        };

        let mut open_by_copy: HashMap<CopyId, Vec<TransactionId>> = HashMap::new();
        let mut open_by_customer: HashMap<CustomerId, BTreeSet<CopyId>> = HashMap::new();
        for tx in self.ledger.all().into_iter().filter(Transaction::is_open) {
            open_by_copy.entry(tx.copy_id).or_default().push(tx.id);
            open_by_customer
                .entry(tx.customer_id)
                .or_default()
                .insert(tx.copy_id);
        }

        for (copy_id, open) in &open_by_copy {
            if open.len() > 1 {
                return violation(format!(
                    "copy {copy_id} has {} open transactions",
                    open.len()
                ));
            }
            if self.catalog.copy(*copy_id).is_err() {
                return violation(format!(
                    "open transaction {} references missing copy {copy_id}",
                    open[0]
                ));
            }
        }

        for copy in self.catalog.copies() {
            let has_open = open_by_copy.contains_key(&copy.id);
            if copy.available == has_open {
                return violation(format!(
                    "copy {} available={} but open transaction present={}",
                    copy.id, copy.available, has_open
                ));
            }
        }

        for customer_id in open_by_customer.keys() {
            if self.customers.get(*customer_id).is_err() {
                return violation(format!(
                    "open transaction references missing customer {customer_id}"
                ));
            }
        }

        let empty = BTreeSet::new();
        for customer in self.customers.all() {
            let expected = open_by_customer.get(&customer.id).unwrap_or(&empty);
            if &customer.borrowed != expected {
                return violation(format!(
                    "customer {} borrowed set {:?} differs from open transactions {:?}",
                    customer.id, customer.borrowed, expected
                ));
            }
        }

        Ok(())
    }

    fn ensure_not_in_use(&self, copy_id: CopyId, available: bool) -> Result<(), LibraryError> {
        match (self.ledger.open_for_copy(copy_id), available) {
            (None, true) => Ok(()),
            (Some(_), false) => Err(LibraryError::CopyInUse(copy_id)),
            (Some(open), true) => Err(LibraryError::InvariantViolation(format!(
                "copy {copy_id} is flagged available but transaction {} is open",
                open.id
            ))),
            (None, false) => Err(LibraryError::InvariantViolation(format!(
                "copy {copy_id} is flagged unavailable without an open transaction"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        engine: Engine,
        ctx: RequestContext,
        book: BookId,
        copy1: CopyId,
        copy2: CopyId,
        ada: CustomerId,
        alan: CustomerId,
    }

    fn fixture() -> Fixture {
        let engine = Engine::new();
        let ctx = RequestContext::new("test-staff");
        let book = engine
            .add_book(&ctx, NewBook::new("Dune", "Herbert", "Sci-Fi"))
            .unwrap();
        let copy1 = engine.add_copy(&ctx, book).unwrap();
        let copy2 = engine.add_copy(&ctx, book).unwrap();
        let ada = engine
            .add_customer(&ctx, NewCustomer::new("Ada", "Lovelace", "ada@example.org"))
            .unwrap();
        let alan = engine
            .add_customer(&ctx, NewCustomer::new("Alan", "Turing", "alan@example.org"))
            .unwrap();
        Fixture {
            engine,
            ctx,
            book,
            copy1,
            copy2,
            ada,
            alan,
        }
    }

    fn is_violation<T>(result: Result<T, LibraryError>) -> bool {
        matches!(result, Err(LibraryError::InvariantViolation(_)))
    }

    #[test]
    fn copy_flagged_available_during_open_loan() {
        let fx = fixture();
        let Fixture { engine, ctx, .. } = &fx;
        let tx = engine.checkout(ctx, fx.copy1, fx.ada).unwrap();
        engine.catalog.copy_entry(fx.copy1).unwrap().lock().check_in();
        let ledger_before = engine.ledger.all();

        assert_eq!(engine.open_transactions_for(fx.ada).unwrap().count(), 0);
        assert!(is_violation(engine.check_consistency()));

        assert!(is_violation(engine.return_book(ctx, fx.copy1, fx.ada)));
        assert!(is_violation(engine.checkout(ctx, fx.copy1, fx.alan)));
        assert!(is_violation(engine.delete_copy(ctx, fx.copy1)));
        assert!(is_violation(engine.delete_book(ctx, fx.book)));

        assert_eq!(engine.ledger.all(), ledger_before);
        assert!(engine.transaction(tx).unwrap().is_open());
        assert!(engine.copy(fx.copy1).unwrap().available);
        assert!(engine.copy(fx.copy2).is_ok(), "book deletion left copies alone");
        assert!(engine.customer(fx.alan).unwrap().borrowed.is_empty());
        assert!(engine.customer(fx.ada).unwrap().borrowed.contains(&fx.copy1));
    }

    #[test]
    fn copy_flagged_out_without_transaction() {
        let fx = fixture();
        let Fixture { engine, ctx, .. } = &fx;
        engine.catalog.copy_entry(fx.copy2).unwrap().lock().check_out();

        assert!(is_violation(engine.check_consistency()));
        assert_eq!(
            engine.checkout(ctx, fx.copy2, fx.ada),
            Err(LibraryError::CopyUnavailable(fx.copy2))
        );
        assert!(matches!(
            engine.return_book(ctx, fx.copy2, fx.ada),
            Err(LibraryError::NoOpenTransaction { .. })
        ));
        assert!(is_violation(engine.delete_copy(ctx, fx.copy2)));

        assert!(engine.ledger.is_empty());
        assert!(engine.copy(fx.copy2).is_ok());
    }

    #[test]
    fn borrowed_set_without_transaction() {
        let fx = fixture();
        let Fixture { engine, ctx, .. } = &fx;
        engine.customers.entry(fx.ada).unwrap().lock().borrow(fx.copy1);

        assert!(is_violation(engine.check_consistency()));
        assert!(is_violation(engine.checkout(ctx, fx.copy1, fx.ada)));
        assert!(is_violation(engine.delete_customer(ctx, fx.ada)));

        assert!(engine.ledger.is_empty());
        assert!(engine.copy(fx.copy1).unwrap().available);
        assert!(engine.customer(fx.ada).is_ok());
    }

    #[test]
    fn borrowed_set_missing_open_loan() {
        let fx = fixture();
        let Fixture { engine, ctx, .. } = &fx;
        let tx = engine.checkout(ctx, fx.copy1, fx.ada).unwrap();
        engine
            .customers
            .entry(fx.ada)
            .unwrap()
            .lock()
            .give_back(fx.copy1);

        assert!(is_violation(engine.check_consistency()));
        assert!(is_violation(engine.return_book(ctx, fx.copy1, fx.ada)));
        assert_eq!(
            engine.delete_customer(ctx, fx.ada),
            Err(LibraryError::CustomerHasOpenLoans(fx.ada))
        );

        // The copy flag still agrees with the ledger, so it stays listed.
        let listed: Vec<CopyId> = engine
            .open_transactions_for(fx.ada)
            .unwrap()
            .map(|copy| copy.copy_id)
            .collect();
        assert_eq!(listed, vec![fx.copy1]);
        assert!(engine.transaction(tx).unwrap().is_open());
        assert!(!engine.copy(fx.copy1).unwrap().available);
    }

    #[test]
    fn healthy_engine_is_consistent() {
        let fx = fixture();
        let Fixture { engine, ctx, .. } = &fx;
        engine.checkout(ctx, fx.copy1, fx.ada).unwrap();
        engine.checkout(ctx, fx.copy2, fx.alan).unwrap();
        engine.return_book(ctx, fx.copy1, fx.ada).unwrap();

        assert_eq!(engine.check_consistency(), Ok(()));
    }
}
