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


//! Catalog store: books and their physical copies.
//!
//! Books are immutable once created. Each book owns its copies; a copy gets a
//! sequence number one past the highest sequence currently held by its book.
//!
//! ```text
//!  Copy (available) ──checkout──► Copy (checked out) ──return──► Copy (available)
//! ```
//!
//! The `available` flag is a projection of the ledger. Only the
//! [`Engine`](crate::Engine) flips it, while holding the copy's lock, in the
//! same unit of work that opens or closes the matching transaction.

use crate::LibraryError;
use crate::base::{BookId, CopyId, IdSequence};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

/// Input for creating a book.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct NewBook {
    #[validate(length(min = 1, max = 255, message = "must be 1 to 255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 255, message = "must be 1 to 255 characters"))]
    pub author: String,
    #[validate(length(min = 1, max = 100, message = "must be 1 to 100 characters"))]
    pub genre: String,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            genre: genre.into(),
        }
    }

    fn normalized(self) -> Self {
        Self {
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            genre: self.genre.trim().to_string(),
        }
    }
}

/// A catalog book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub genre: String,
}

/// Snapshot of a physical copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookCopy {
    pub id: CopyId,
    pub book_id: BookId,
    /// Position of the copy within its book, starting at 1.
    pub sequence: u32,
    pub available: bool,
}

/// Case-insensitive substring filter over catalog fields.
///
/// Every field that is set must match; an empty query matches every book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
}

impl BookQuery {
    pub fn matches(&self, book: &Book) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            match needle.as_deref().map(str::trim) {
                None | Some("") => true,
                Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            }
        }

        contains(&book.title, &self.title)
            && contains(&book.author, &self.author)
            && contains(&book.genre, &self.genre)
    }
}

#[derive(Debug, Default)]
pub(crate) struct BookState {
    /// Live copies keyed by sequence number.
    copies: BTreeMap<u32, CopyId>,
    removed: bool,
}

impl BookState {
    fn next_sequence(&self) -> u32 {
        self.copies.keys().next_back().map_or(1, |last| last + 1)
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }

    /// Copy ids in ascending order, which is also the lock order.
    pub(crate) fn copy_ids(&self) -> Vec<CopyId> {
        let mut ids: Vec<CopyId> = self.copies.values().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug)]
pub(crate) struct BookEntry {
    book: Book,
    inner: Mutex<BookState>,
}

impl BookEntry {
    pub(crate) fn lock(&self) -> MutexGuard<'_, BookState> {
        self.inner.lock()
    }
}

#[derive(Debug)]
pub(crate) struct CopyState {
    available: bool,
    removed: bool,
}

impl CopyState {
    pub(crate) fn is_available(&self) -> bool {
        self.available
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn check_out(&mut self) {
        debug_assert!(self.available, "Invariant violated: checkout of unavailable copy");
        self.available = false;
    }

    pub(crate) fn check_in(&mut self) {
        debug_assert!(!self.available, "Invariant violated: return of available copy");
        self.available = true;
    }
}

/// A copy with its lock. Identity fields never change.
#[derive(Debug)]
pub(crate) struct CopyEntry {
    id: CopyId,
    book_id: BookId,
    sequence: u32,
    inner: Mutex<CopyState>,
}

impl CopyEntry {
    pub(crate) fn id(&self) -> CopyId {
        self.id
    }

    pub(crate) fn book_id(&self) -> BookId {
        self.book_id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CopyState> {
        self.inner.lock()
    }

    fn snapshot(&self, state: &CopyState) -> BookCopy {
        BookCopy {
            id: self.id,
            book_id: self.book_id,
            sequence: self.sequence,
            available: state.available,
        }
    }
}

/// Concurrent store of books and copies.
///
/// Maps hold `Arc` handles so callers can drop the map guard before taking an
/// entity lock. A map guard is never held while waiting on an entity lock.
#[derive(Debug, Default)]
pub struct Catalog {
    book_ids: IdSequence,
    copy_ids: IdSequence,
    books: DashMap<BookId, Arc<BookEntry>>,
    copies: DashMap<CopyId, Arc<CopyEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_book(&self, new_book: NewBook) -> Result<BookId, LibraryError> {
        let new_book = new_book.normalized();
        new_book.validate()?;

        let id: BookId = self.book_ids.next().ok_or(LibraryError::IdsExhausted("book"))?;
        let entry = BookEntry {
            book: Book {
                id,
                title: new_book.title,
                author: new_book.author,
                genre: new_book.genre,
            },
            inner: Mutex::new(BookState::default()),
        };
        self.books.insert(id, Arc::new(entry));
        Ok(id)
    }

    /// Adds a copy under the book's lock so concurrent additions get distinct
    /// sequence numbers.
    pub(crate) fn insert_copy(&self, book_id: BookId) -> Result<CopyId, LibraryError> {
        let book = self.book_entry(book_id)?;
        let mut state = book.lock();
        if state.is_removed() {
            return Err(LibraryError::BookNotFound(book_id));
        }

        let id: CopyId = self.copy_ids.next().ok_or(LibraryError::IdsExhausted("copy"))?;
        let sequence = state.next_sequence();
        let entry = CopyEntry {
            id,
            book_id,
            sequence,
            inner: Mutex::new(CopyState {
                available: true,
                removed: false,
            }),
        };
        self.copies.insert(id, Arc::new(entry));
        state.copies.insert(sequence, id);
        Ok(id)
    }

    /// Removes a copy. Caller holds both the book and the copy lock and has
    /// checked that the copy is not in use.
    pub(crate) fn detach_copy(&self, book: &mut BookState, copy: &CopyEntry, state: &mut CopyState) {
        state.removed = true;
        book.copies.remove(&copy.sequence);
        self.copies.remove(&copy.id);
    }

    /// Removes a book. Caller holds the book lock and has already detached
    /// every copy.
    pub(crate) fn detach_book(&self, book: &BookEntry, state: &mut BookState) {
        debug_assert!(state.copies.is_empty(), "Invariant violated: book removed with live copies");
        state.removed = true;
        self.books.remove(&book.book.id);
    }

    pub(crate) fn book_entry(&self, id: BookId) -> Result<Arc<BookEntry>, LibraryError> {
        self.books
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LibraryError::BookNotFound(id))
    }

    pub(crate) fn copy_entry(&self, id: CopyId) -> Result<Arc<CopyEntry>, LibraryError> {
        self.copies
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LibraryError::CopyNotFound(id))
    }

    pub fn book(&self, id: BookId) -> Result<Book, LibraryError> {
        self.book_entry(id).map(|entry| entry.book.clone())
    }

    pub fn copy(&self, id: CopyId) -> Result<BookCopy, LibraryError> {
        let entry = self.copy_entry(id)?;
        let state = entry.lock();
        if state.removed {
            return Err(LibraryError::CopyNotFound(id));
        }
        Ok(entry.snapshot(&state))
    }

    /// All books in ascending id order.
    pub fn books(&self) -> Vec<Book> {
        let mut books: Vec<Book> = self.books.iter().map(|entry| entry.book.clone()).collect();
        books.sort_by_key(|book| book.id);
        books
    }

    pub fn search(&self, query: &BookQuery) -> Vec<Book> {
        self.books()
            .into_iter()
            .filter(|book| query.matches(book))
            .collect()
    }

    /// All copies in ascending id order.
    pub fn copies(&self) -> Vec<BookCopy> {
        // Collect handles first: locking a copy while iterating would hold a
        // shard guard across the wait.
        let handles: Vec<Arc<CopyEntry>> = self.copies.iter().map(|e| Arc::clone(e.value())).collect();
        let mut copies: Vec<BookCopy> = handles
            .iter()
            .filter_map(|entry| {
                let state = entry.lock();
                (!state.removed).then(|| entry.snapshot(&state))
            })
            .collect();
        copies.sort_by_key(|copy| copy.id);
        copies
    }

    /// Copies of one book in sequence order.
    pub fn copies_of(&self, book_id: BookId) -> Result<Vec<BookCopy>, LibraryError> {
        let book = self.book_entry(book_id)?;
        let ids: Vec<CopyId> = book.lock().copies.values().copied().collect();
        Ok(ids.into_iter().filter_map(|id| self.copy(id).ok()).collect())
    }

    /// Copies of one book that can be checked out right now.
    pub fn available_copies_of(&self, book_id: BookId) -> Result<Vec<BookCopy>, LibraryError> {
        Ok(self
            .copies_of(book_id)?
            .into_iter()
            .filter(|copy| copy.available)
            .collect())
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn copy_count(&self) -> usize {
        self.copies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dune() -> NewBook {
        NewBook::new("Dune", "Herbert", "Sci-Fi")
    }

    #[test]
    fn copies_get_increasing_sequence_numbers() {
        let catalog = Catalog::new();
        let book = catalog.insert_book(dune()).unwrap();
        let first = catalog.insert_copy(book).unwrap();
        let second = catalog.insert_copy(book).unwrap();

        assert_eq!(catalog.copy(first).unwrap().sequence, 1);
        assert_eq!(catalog.copy(second).unwrap().sequence, 2);
        assert!(catalog.copy(first).unwrap().available);
    }

    #[test]
    fn sequence_is_scoped_to_the_book() {
        let catalog = Catalog::new();
        let dune = catalog.insert_book(dune()).unwrap();
        let emma = catalog
            .insert_book(NewBook::new("Emma", "Austen", "Classic"))
            .unwrap();
        catalog.insert_copy(dune).unwrap();
        catalog.insert_copy(dune).unwrap();
        let emma_copy = catalog.insert_copy(emma).unwrap();

        assert_eq!(catalog.copy(emma_copy).unwrap().sequence, 1);
    }

    #[test]
    fn sequence_follows_current_maximum_after_removal() {
        let catalog = Catalog::new();
        let book_id = catalog.insert_book(dune()).unwrap();
        let first = catalog.insert_copy(book_id).unwrap();
        let second = catalog.insert_copy(book_id).unwrap();

        let book = catalog.book_entry(book_id).unwrap();
        let copy = catalog.copy_entry(second).unwrap();
        catalog.detach_copy(&mut book.lock(), &copy, &mut copy.lock());

        let third = catalog.insert_copy(book_id).unwrap();
        assert_eq!(catalog.copy(third).unwrap().sequence, 2);
        assert_ne!(third, second, "copy ids are never reused");
        assert_eq!(catalog.copies_of(book_id).unwrap().len(), 2);
        assert!(catalog.copy(first).is_ok());
    }

    #[test]
    fn insert_copy_for_unknown_book_fails() {
        let catalog = Catalog::new();
        assert_eq!(
            catalog.insert_copy(BookId(99)),
            Err(LibraryError::BookNotFound(BookId(99)))
        );
    }

    #[test]
    fn insert_book_trims_and_validates() {
        let catalog = Catalog::new();
        let id = catalog
            .insert_book(NewBook::new("  Dune ", "Herbert", " Sci-Fi"))
            .unwrap();
        assert_eq!(catalog.book(id).unwrap().title, "Dune");
        assert_eq!(catalog.book(id).unwrap().genre, "Sci-Fi");

        let result = catalog.insert_book(NewBook::new("   ", "Herbert", "Sci-Fi"));
        assert!(matches!(
            result,
            Err(LibraryError::Validation { ref field, .. }) if field == "title"
        ));
        assert_eq!(catalog.book_count(), 1);
    }

    #[test]
    fn search_matches_case_insensitive_substrings() {
        let catalog = Catalog::new();
        catalog.insert_book(dune()).unwrap();
        catalog
            .insert_book(NewBook::new("Children of Dune", "Herbert", "Sci-Fi"))
            .unwrap();
        catalog
            .insert_book(NewBook::new("Emma", "Austen", "Classic"))
            .unwrap();

        let query = BookQuery {
            title: Some("dune".into()),
            ..BookQuery::default()
        };
        assert_eq!(catalog.search(&query).len(), 2);

        let query = BookQuery {
            title: Some("DUNE".into()),
            author: Some("austen".into()),
            genre: None,
        };
        assert!(catalog.search(&query).is_empty());

        assert_eq!(catalog.search(&BookQuery::default()).len(), 3);
    }

    #[test]
    fn available_copies_filters_on_flag() {
        let catalog = Catalog::new();
        let book = catalog.insert_book(dune()).unwrap();
        let first = catalog.insert_copy(book).unwrap();
        let second = catalog.insert_copy(book).unwrap();

        catalog.copy_entry(first).unwrap().lock().check_out();

        let available = catalog.available_copies_of(book).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, second);
    }

    #[test]
    fn copy_ids_run_out_without_touching_the_book() {
        let catalog = Catalog {
            copy_ids: IdSequence::starting_at(u32::MAX),
            ..Catalog::default()
        };
        let book = catalog.insert_book(dune()).unwrap();

        assert_eq!(
            catalog.insert_copy(book),
            Err(LibraryError::IdsExhausted("copy"))
        );
        assert!(catalog.copies_of(book).unwrap().is_empty());
        assert_eq!(catalog.copy_count(), 0);
    }
}
