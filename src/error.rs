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


//! Error types for circulation operations.

use crate::base::{BookId, CopyId, CustomerId, TransactionId};
use thiserror::Error;

/// Coarse classification of a [`LibraryError`].
///
/// Presentation layers map this to a status code; none of the kinds is
/// transient, so nothing is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced book, copy, customer or transaction does not exist.
    NotFound,
    /// The request conflicts with the current circulation state.
    InvalidState,
    /// The request itself is malformed.
    Validation,
    /// The ledger and its projections disagree. Should never happen.
    InvariantViolation,
}

/// Circulation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("book {0} not found")]
    BookNotFound(BookId),

    #[error("copy {0} not found")]
    CopyNotFound(CopyId),

    #[error("customer {0} not found")]
    CustomerNotFound(CustomerId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Checkout of a copy that is already out
    #[error("copy {0} is not available")]
    CopyUnavailable(CopyId),

    /// Return with no matching open transaction for the copy and customer
    #[error("no open transaction for copy {copy} and customer {customer}")]
    NoOpenTransaction { copy: CopyId, customer: CustomerId },

    /// Deletion of a copy that is checked out
    #[error("copy {0} is checked out")]
    CopyInUse(CopyId),

    /// Deletion of a customer who still holds copies
    #[error("customer {0} has open loans")]
    CustomerHasOpenLoans(CustomerId),

    #[error("email {0} is already registered")]
    DuplicateEmail(String),

    /// The id space of a store is used up
    #[error("no {0} ids left")]
    IdsExhausted(&'static str),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Ledger and availability projections disagree
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BookNotFound(_)
            | Self::CopyNotFound(_)
            | Self::CustomerNotFound(_)
            | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::CopyUnavailable(_)
            | Self::NoOpenTransaction { .. }
            | Self::CopyInUse(_)
            | Self::CustomerHasOpenLoans(_)
            | Self::DuplicateEmail(_)
            | Self::IdsExhausted(_) => ErrorKind::InvalidState,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<validator::ValidationErrors> for LibraryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Report the first failing field; callers fix one thing at a time.
        let field_errors = errors.field_errors();
        let mut fields: Vec<_> = field_errors.into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first() {
            Some((field, errs)) => {
                let reason = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "invalid value".to_string());
                Self::validation(field.to_string(), reason)
            }
            None => Self::validation("input", "invalid value"),
        }
    }
}
