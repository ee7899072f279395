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

use crate::{
    entity::Ticket,
    types::{Address, OrgId, UserId},
};

/// Identity on whose behalf a core operation runs. Authentication happened
/// at the edge; the core only enforces ownership.
#[derive(Debug, Clone, PartialEq)]
pub enum Requester {
    /// an end user, owner of their own tickets.
    Customer(UserId),
    /// an organization admin.
    Admin {
        ///
        email: Address,
        /// the organization the admin belongs to, if scoped.
        organization_id: Option<OrgId>,
    },
    /// internal tasks (reaper, poller); bypasses ownership checks.
    System,
}

impl Requester {
    /// Ownership rule shared by attachment download/upload/delete and
    /// thread access.
    #[must_use]
    pub fn may_access(&self, ticket: &Ticket) -> bool {
        match self {
            Self::Customer(user) => ticket.user_id.as_ref() == Some(user),
            Self::Admin {
                organization_id, ..
            } => match (organization_id, &ticket.organization_id) {
                (Some(admin_org), Some(ticket_org)) => admin_org == ticket_org,
                // unscoped admins manage unscoped tickets only.
                (None, None) => true,
                (None, Some(_)) | (Some(_), None) => false,
            },
            Self::System => true,
        }
    }

    /// display identity recorded on rows such as `uploaded_by`.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Customer(user) => user.to_string(),
            Self::Admin { email, .. } => email.to_string(),
            Self::System => "system".to_owned(),
        }
    }
}
