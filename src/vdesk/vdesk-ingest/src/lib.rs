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

//! Inbound email: the per-account IMAP worker, the shared
//! dedup → classify → bind pipeline (also fed by the email webhook), and
//! the failure backoff that eventually disables a broken account.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cursor;
mod imap;
mod pipeline;
mod worker;

pub use cursor::PollerCursor;
pub use imap::{FetchedMessage, ImapConnector, ImapError, Mailbox, MailboxConnector};
pub use pipeline::{IngestPipeline, PipelineOutcome};
pub use worker::{AccountWorker, HostLimiter};
