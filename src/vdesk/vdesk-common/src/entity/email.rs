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

use crate::types::{AccountId, Address, EmailMessageId, TicketId};

/// Delivery state of an email row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    ///
    Sent,
    ///
    Received,
    ///
    Failed,
    ///
    Draft,
    /// accepted for delivery, provider outcome unknown yet.
    Pending,
    /// classified as spam or promotion and kept only for audit.
    Filtered,
}

/// Direction of an email row relative to the platform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailDirection {
    ///
    Inbound,
    ///
    Outbound,
}

/// A single email tied to an account, and possibly threaded into a ticket.
///
/// `(email_account_id, message_id)` is unique: re-delivering the same IMAP
/// message is absorbed as a duplicate insert, which makes ingestion
/// idempotent across poller crashes.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EmailMessage {
    ///
    pub id: EmailMessageId,
    ///
    pub ticket_id: Option<TicketId>,
    ///
    pub email_account_id: AccountId,
    /// RFC 2822 `Message-ID` header value.
    pub message_id: String,
    /// RFC 2822 `In-Reply-To` header value, used for ticket binding.
    pub in_reply_to: Option<String>,
    ///
    pub subject: String,
    ///
    pub body_text: Option<String>,
    ///
    pub body_html: Option<String>,
    ///
    pub from: Address,
    ///
    pub to: Vec<Address>,
    ///
    pub cc: Vec<Address>,
    ///
    pub bcc: Vec<Address>,
    ///
    pub status: EmailStatus,
    ///
    pub direction: EmailDirection,
    ///
    pub has_attachments: bool,
    /// provider failure detail when `status=failed`.
    pub error_message: Option<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub sent_at: Option<time::OffsetDateTime>,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub received_at: Option<time::OffsetDateTime>,
}

impl EmailMessage {
    /// Key under which inbound dedup is enforced.
    #[must_use]
    pub fn dedup_key(&self) -> (AccountId, &str) {
        (self.email_account_id, self.message_id.as_str())
    }
}
