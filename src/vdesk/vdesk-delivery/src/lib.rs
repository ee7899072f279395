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

//! vDesk outbound delivery: one [`Provider`] implementation per wire
//! (direct SMTP, SendGrid, SES, Mailgun), and the dispatcher that selects
//! the sender account, renders templates, threads the message into the
//! customer's mailbox and retries transient failures.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod dispatcher;
mod envelope;

/// the per-wire senders.
pub mod provider {
    mod mailgun;
    mod sendgrid;
    mod ses;
    mod smtp;

    pub use mailgun::Mailgun;
    pub use sendgrid::SendGrid;
    pub use ses::Ses;
    pub use smtp::Smtp;

    use crate::envelope::Envelope;
    use crate::SendError;

    /// Acknowledgment of an accepted send.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Receipt {
        /// id the provider assigned, when it reports one.
        pub provider_message_id: Option<String>,
    }

    /// One outbound wire. Implementations send a fully built envelope and
    /// classify their failures into transient and permanent.
    #[async_trait::async_trait]
    pub trait Provider: Send + Sync {
        /// Deliver one envelope.
        async fn send(&self, envelope: &Envelope) -> Result<Receipt, SendError>;

        /// Cheap reachability/authentication probe for the account CRUD.
        async fn test_connection(&self) -> Result<(), SendError>;
    }
}

pub use dispatcher::{Dispatcher, ProviderFactory, SendRequest, StandardProviderFactory};
pub use envelope::Envelope;

/// Failure of one provider send.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// network trouble, 5xx, SMTP 4xx: worth retrying.
    #[error("transient send failure: {0}")]
    Transient(String),
    /// authentication or a rejected request: retrying cannot help.
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    ///
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The outbound retry schedule: three attempts at 500 ms, 1 s and 2 s,
/// each delay widened by up to 50 % of jitter.
pub(crate) fn backoff_delay(
    attempt: u32,
    random: &dyn vdesk_common::RandomSource,
) -> std::time::Duration {
    let base_ms = 500_u64 << attempt;
    std::time::Duration::from_millis(base_ms + random.jitter_ms(base_ms / 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoJitter;
    impl vdesk_common::RandomSource for NoJitter {
        fn jitter_ms(&self, _: u64) -> u64 {
            0
        }
    }

    struct MaxJitter;
    impl vdesk_common::RandomSource for MaxJitter {
        fn jitter_ms(&self, upper: u64) -> u64 {
            upper.saturating_sub(1)
        }
    }

    #[test]
    fn schedule_doubles_per_attempt() {
        assert_eq!(backoff_delay(0, &NoJitter).as_millis(), 500);
        assert_eq!(backoff_delay(1, &NoJitter).as_millis(), 1000);
        assert_eq!(backoff_delay(2, &NoJitter).as_millis(), 2000);
    }

    #[test]
    fn jitter_stays_below_half_the_base() {
        assert!(backoff_delay(0, &MaxJitter).as_millis() < 750);
        assert!(backoff_delay(2, &MaxJitter).as_millis() < 3000);
    }
}
