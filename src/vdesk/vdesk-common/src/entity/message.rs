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

use crate::types::{MessageId, TicketId};

/// Author kind of a thread message.
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
pub enum MessageSender {
    ///
    Customer,
    ///
    Ai,
    ///
    Admin,
    /// notes emitted by the platform itself (escalation, rate limiting, ...).
    System,
}

/// One entry of a ticket thread. `created_at` strictly increases within a
/// ticket; the state manager stamps it after taking the per-ticket lock.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Message {
    ///
    pub id: MessageId,
    ///
    pub ticket_id: TicketId,
    ///
    pub sender: MessageSender,
    /// the text body.
    pub message: String,
    /// model confidence, present on AI messages only.
    pub confidence: Option<f64>,
    /// whether generation succeeded, present on AI messages only.
    pub success: Option<bool>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl Message {
    /// Only customers and the platform itself may open a thread.
    #[must_use]
    pub const fn may_open_thread(&self) -> bool {
        matches!(self.sender, MessageSender::Customer | MessageSender::System)
    }
}
