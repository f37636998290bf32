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


//! Checkout transactions.
//!
//! A transaction follows a two-state lifecycle:
//! - [`Open`] → [`Returned`] (via return, exactly once)
//!
//! It is created by a successful checkout and never deleted.
//!
//! [`Open`]: TransactionStatus::Open
//! [`Returned`]: TransactionStatus::Returned

use crate::base::{CopyId, CustomerId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub copy_id: CopyId,
    pub customer_id: CustomerId,
    pub checked_out_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Open,
    Returned,
}

impl Transaction {
    pub(crate) fn open(
        id: TransactionId,
        copy_id: CopyId,
        customer_id: CustomerId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            copy_id,
            customer_id,
            checked_out_at: at,
            returned_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn status(&self) -> TransactionStatus {
        if self.is_open() {
            TransactionStatus::Open
        } else {
            TransactionStatus::Returned
        }
    }
}
