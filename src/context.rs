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


//! Request-scoped context for mutating operations.
//!
//! Every mutating [`Engine`](crate::Engine) operation takes a
//! [`RequestContext`] instead of reading ambient session state or the wall
//! clock. The context names the staff member acting and fixes the instant
//! the request happened, which becomes the checkout or return timestamp.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    actor: String,
    now: DateTime<Utc>,
}

impl RequestContext {
    /// Creates a context for `actor` stamped with the current time.
    pub fn new(actor: impl Into<String>) -> Self {
        Self::at(actor, Utc::now())
    }

    /// Creates a context for `actor` at a fixed instant.
    pub fn at(actor: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            now,
        }
    }

    /// Context for batch jobs with no interactive staff member.
    pub fn system() -> Self {
        Self::new("system")
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
