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

use crate::types::{Address, OrgId, SlaId, TicketId, UserId};

/// Lifecycle state of a ticket.
///
/// ```text
/// open ──assign──▶ human_assigned ──close──▶ closed
///  │                                          ▲
///  └───────────────── close ──────────────────┘
/// ```
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
pub enum TicketStatus {
    /// freshly created or reopened by a customer message, eligible for AI.
    Open,
    /// an admin took the conversation over.
    HumanAssigned,
    /// resolved; the only state from which soft-delete is allowed.
    Closed,
}

/// Urgency of a ticket, drives SLA policy selection and routing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    ///
    Low,
    ///
    Medium,
    ///
    High,
    ///
    Urgent,
}

/// Channel a ticket entered the platform through.
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
pub enum TicketSource {
    ///
    Web,
    ///
    Email,
    ///
    Api,
    ///
    Chat,
    ///
    Phone,
    ///
    Social,
}

impl TicketSource {
    /// Channels on which an unassigned open ticket may receive an AI reply.
    #[must_use]
    pub const fn permits_ai(self) -> bool {
        matches!(self, Self::Web | Self::Email | Self::Api)
    }
}

/// One support conversation: a thread of customer, admin, AI and system
/// messages. Mutated exclusively through the ticket state manager.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Ticket {
    ///
    pub id: TicketId,
    ///
    pub organization_id: Option<OrgId>,
    /// end user owning the conversation, unknown for some inbound email.
    pub user_id: Option<UserId>,
    /// product or installation scope used for continuation matching.
    pub context: String,
    ///
    pub subject: String,
    ///
    pub status: TicketStatus,
    ///
    pub priority: Priority,
    ///
    pub source: TicketSource,
    ///
    pub category: Option<String>,
    /// admin the ticket is assigned to, set by escalation or routing.
    pub assigned_to: Option<Address>,
    /// SLA policy linked at creation or on priority change.
    pub sla_id: Option<SlaId>,
    ///
    pub is_deleted: bool,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<time::OffsetDateTime>,
    /// timestamp of the first admin reply, drives the response SLA.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub first_response_at: Option<time::OffsetDateTime>,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_response_at: Option<time::OffsetDateTime>,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<time::OffsetDateTime>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
}

impl Ticket {
    /// A ticket is a continuation candidate while it is neither closed nor
    /// trashed. At most one such ticket exists per `(context, subject, user)`.
    #[must_use]
    pub fn accepts_continuation(&self) -> bool {
        self.status != TicketStatus::Closed && !self.is_deleted
    }

    /// Eligibility of this ticket for an AI-generated reply, re-checked
    /// under the per-ticket lock before every AI commit.
    #[must_use]
    pub fn accepts_ai_reply(&self) -> bool {
        self.status == TicketStatus::Open
            && self.assigned_to.is_none()
            && !self.is_deleted
            && self.source.permits_ai()
    }

    /// Check the record invariants; the state manager refuses to persist a
    /// ticket that fails them.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.status == TicketStatus::Closed && self.resolved_at.is_none() {
            return false;
        }
        if self.is_deleted && self.status != TicketStatus::Closed {
            return false;
        }
        if self.assigned_to.is_some() && self.status == TicketStatus::Open {
            return false;
        }
        true
    }
}
