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

// macro to generate one opaque v4-backed identifier per aggregate, so a
// `TicketId` can never be handed to a query expecting a `MessageId`.
macro_rules! define_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde_with::SerializeDisplay,
            serde_with::DeserializeFromStr,
        )]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a [`crate::entity::Ticket`].
    TicketId
);
define_id!(
    /// Identifier of a [`crate::entity::Message`].
    MessageId
);
define_id!(
    /// Identifier of an [`crate::entity::EmailMessage`] row, not to be
    /// confused with the RFC 2822 `Message-ID` header it carries.
    EmailMessageId
);
define_id!(
    /// Identifier of an [`crate::entity::EmailAccount`].
    AccountId
);
define_id!(
    /// Identifier of an [`crate::entity::Attachment`].
    AttachmentId
);
define_id!(
    /// Identifier of a [`crate::entity::RoutingRule`].
    RuleId
);
define_id!(
    /// Identifier of an [`crate::entity::SlaDefinition`].
    SlaId
);
define_id!(
    /// Identifier of an [`crate::entity::SlaViolation`].
    ViolationId
);
define_id!(
    /// Identifier of a [`crate::entity::Tag`].
    TagId
);
define_id!(
    /// Identifier of a [`crate::entity::Category`].
    CategoryId
);
define_id!(
    /// Identifier of an [`crate::entity::EmailTemplate`].
    TemplateId
);
define_id!(
    /// Identifier of an organization, issued by the account system.
    OrgId
);
define_id!(
    /// Identifier of an end user, issued by the account system.
    UserId
);

/// Opaque storage key of an attachment blob, `<ticket_id>/<uuid>`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde_with::SerializeDisplay, serde_with::DeserializeFromStr,
)]
pub struct AttachmentKey(String);

impl AttachmentKey {
    /// Mint a fresh key under the given ticket.
    #[must_use]
    pub fn generate(ticket_id: TicketId) -> Self {
        Self(format!("{ticket_id}/{}", uuid::Uuid::new_v4()))
    }

    /// The raw storage key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AttachmentKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_per_call() {
        assert_ne!(TicketId::new(), TicketId::new());
    }

    #[test]
    fn serde_round_trip() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<MessageId>(&json).unwrap(), id);
    }

    #[test]
    fn attachment_key_is_scoped_by_ticket() {
        let ticket = TicketId::new();
        let key = AttachmentKey::generate(ticket);
        assert!(key.as_str().starts_with(&ticket.to_string()));
    }
}
