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


//! Core identifier types for books, copies, customers and transactions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a catalog book.
    BookId
);

define_id!(
    /// Unique identifier for a physical copy of a book.
    ///
    /// Globally unique, unlike the copy's sequence number, which is only
    /// unique within its book.
    CopyId
);

define_id!(
    /// Unique identifier for a library customer.
    CustomerId
);

define_id!(
    /// Unique identifier for a checkout transaction in the ledger.
    TransactionId
);

/// Monotonic id allocator shared by the stores.
///
/// Starts at 1 and never hands out the same value twice, so ids of deleted
/// records are not reused. The sequence stops short of `u32::MAX` instead of
/// wrapping.
#[derive(Debug)]
pub(crate) struct IdSequence(AtomicU32);

impl IdSequence {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: u32) -> Self {
        Self(AtomicU32::new(first))
    }

    /// The next id, or `None` once the sequence is exhausted.
    pub(crate) fn next<T: From<u32>>(&self) -> Option<T> {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
            .map(T::from)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
