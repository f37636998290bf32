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


//! # Library Ledger
//!
//! This library provides the circulation core of a small library: a catalog
//! of books and physical copies, a customer register, and a ledger of
//! checkout/return transactions kept consistent with copy availability.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central processor enforcing the checkout/return lifecycle
//! - [`Catalog`]: Books and their copies, each copy with an availability flag
//! - [`CustomerStore`]: Customers and the copies they currently hold
//! - [`Ledger`]: Append-mostly log of [`Transaction`]s, the source of truth
//! - [`LibraryError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use library_ledger_rs::{Engine, LibraryError, NewBook, NewCustomer, RequestContext};
//!
//! let engine = Engine::new();
//! let ctx = RequestContext::new("front-desk");
//!
//! let book = engine.add_book(&ctx, NewBook::new("Dune", "Herbert", "Sci-Fi")).unwrap();
//! let copy = engine.add_copy(&ctx, book).unwrap();
//! let ada = engine
//!     .add_customer(&ctx, NewCustomer::new("Ada", "Lovelace", "ada@example.org"))
//!     .unwrap();
//!
//! engine.checkout(&ctx, copy, ada).unwrap();
//! assert!(!engine.copy(copy).unwrap().available);
//! assert_eq!(engine.checkout(&ctx, copy, ada), Err(LibraryError::CopyUnavailable(copy)));
//!
//! engine.return_book(&ctx, copy, ada).unwrap();
//! assert!(engine.copy(copy).unwrap().available);
//! ```
//!
//! ## Thread Safety
//!
//! The engine locks per copy, so checkouts and returns of different copies
//! proceed in parallel while operations on the same copy are serialized.

pub mod catalog;
pub mod context;
pub mod customer;
mod base;
mod engine;
pub mod error;
pub mod ledger;
mod transaction;

pub use base::{BookId, CopyId, CustomerId, TransactionId};
pub use catalog::{Book, BookCopy, BookQuery, Catalog, NewBook};
pub use context::RequestContext;
pub use customer::{Customer, CustomerStore, NewCustomer};
pub use engine::{Engine, ReturnableCopy};
pub use error::{ErrorKind, LibraryError};
pub use ledger::Ledger;
pub use transaction::{Transaction, TransactionStatus};
