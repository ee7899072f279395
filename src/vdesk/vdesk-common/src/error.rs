/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::store::StoreError;

/// Result alias of the conversation core.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds of the conversation core. User-visible variants carry a
/// short reason and never a stack trace or PII.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// the referenced entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// entity kind, e.g. `"ticket"`.
        entity: &'static str,
        /// display form of the identifier.
        id: String,
    },

    /// the state machine refused the operation.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// the caller is not authenticated for this operation.
    #[error("unauthorized")]
    Unauthorized,

    /// the caller is authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// input shape, size or media type rejected.
    #[error("validation failed: {0}")]
    Validation(String),

    /// a per-key window is exhausted; the caller may retry after the hint.
    #[error("rate limited, retry in {0:?}")]
    RateLimited(std::time::Duration),

    /// the datastore failed; the core never retries writes on its own.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// a side effect failed in a way that is worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// a side effect failed in a way that retrying cannot fix.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// shutdown or deadline hit while the operation was suspended.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether a retry policy may re-attempt the failed operation.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::StoreUnavailable(_))
    }

    /// Shorthand for a [`Error::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_transient() {
        assert!(Error::from(StoreError::unavailable("connection refused")).is_transient());
        assert!(!Error::InvalidTransition("closed".into()).is_transient());
    }

    #[test]
    fn reasons_are_short() {
        let rendered = Error::not_found("ticket", "abc").to_string();
        assert_eq!(rendered, "ticket 'abc' not found");
    }
}
