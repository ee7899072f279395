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
    entity::{
        Attachment, EmailAccount, EmailMessage, EmailTemplate, Message, Priority, RoutingLog,
        RoutingRule, SlaDefinition, SlaViolation, Tag, Ticket, ViolationType,
    },
    types::{
        AccountId, Address, AttachmentId, OrgId, SlaId, TagId, TemplateId, TicketId, UserId,
    },
};

/// Failure of the datastore. Always surfaced, never silently retried.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// connectivity or backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// the operation outlived the store deadline.
    #[error("store timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

/// Result alias of every store query.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The persistent datastore, treated as an opaque collaborator exposing
/// exactly the queries the core needs. The backend is expected to preserve
/// write order per ticket and to enforce the `(account, message_id)`
/// uniqueness reported by [`Store::insert_email`].
#[async_trait::async_trait]
#[allow(clippy::too_many_arguments)]
pub trait Store: Send + Sync {
    // ---- tickets ----------------------------------------------------------

    /// Conditional insert: `false` (and no write) when another live open
    /// ticket with the same `(context, subject, user)` already exists,
    /// which keeps the one-open-continuation invariant under races.
    async fn create_ticket(&self, ticket: &Ticket) -> StoreResult<bool>;
    ///
    async fn update_ticket(&self, ticket: &Ticket) -> StoreResult<()>;
    ///
    async fn ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>>;
    ///
    async fn tickets(&self, ids: &[TicketId]) -> StoreResult<Vec<Ticket>>;
    /// the at-most-one open `(context, subject, user)` continuation.
    async fn find_open_continuation(
        &self,
        context: &str,
        subject: &str,
        user_id: Option<UserId>,
    ) -> StoreResult<Option<Ticket>>;
    /// open tickets carrying an SLA link, fed to the violation scanner.
    async fn open_tickets_with_sla(&self) -> StoreResult<Vec<Ticket>>;
    /// the trash: soft-deleted tickets, newest first.
    async fn deleted_tickets(&self) -> StoreResult<Vec<Ticket>>;
    /// soft-deleted tickets whose `deleted_at` is before the cutoff.
    async fn deleted_tickets_before(
        &self,
        cutoff: time::OffsetDateTime,
    ) -> StoreResult<Vec<Ticket>>;
    /// remove the ticket row and every owned row (messages, emails, tags).
    async fn delete_ticket_cascade(&self, id: TicketId) -> StoreResult<()>;

    // ---- thread messages --------------------------------------------------

    ///
    async fn append_message(&self, message: &Message) -> StoreResult<()>;
    /// thread in insertion order.
    async fn messages(&self, ticket_id: TicketId) -> StoreResult<Vec<Message>>;

    // ---- emails -----------------------------------------------------------

    /// Insert unless `(email_account_id, message_id)` exists; `false` means
    /// the row was a duplicate and nothing was written.
    async fn insert_email(&self, email: &EmailMessage) -> StoreResult<bool>;
    /// dedup precheck of the poller, same key as [`Store::insert_email`].
    async fn email_exists(&self, account: AccountId, message_id: &str) -> StoreResult<bool>;
    ///
    async fn update_email(&self, email: &EmailMessage) -> StoreResult<()>;
    /// resolve an RFC 2822 message id to the stored row, any account.
    async fn email_by_rfc_message_id(&self, message_id: &str)
        -> StoreResult<Option<EmailMessage>>;
    /// email thread of a ticket in receive/send order.
    async fn emails(&self, ticket_id: TicketId) -> StoreResult<Vec<EmailMessage>>;
    /// most recent inbound email of a ticket, for `In-Reply-To`.
    async fn latest_inbound_email(&self, ticket_id: TicketId)
        -> StoreResult<Option<EmailMessage>>;
    /// the ticket's original email, whose id seeds `References`.
    async fn first_email(&self, ticket_id: TicketId) -> StoreResult<Option<EmailMessage>>;

    // ---- accounts & users -------------------------------------------------

    ///
    async fn email_accounts(&self) -> StoreResult<Vec<EmailAccount>>;
    ///
    async fn email_account(&self, id: AccountId) -> StoreResult<Option<EmailAccount>>;
    ///
    async fn update_email_account(&self, account: &EmailAccount) -> StoreResult<()>;
    /// active accounts of an organization, default first.
    async fn active_accounts(&self, org: Option<OrgId>) -> StoreResult<Vec<EmailAccount>>;
    /// whether the address belongs to a registered user.
    async fn is_known_user(&self, address: &Address) -> StoreResult<bool>;
    /// user lookup by address, for continuation matching on inbound email.
    async fn user_by_address(&self, address: &Address) -> StoreResult<Option<UserId>>;
    /// address of a user, for outbound template variables.
    async fn user_address(&self, user_id: UserId) -> StoreResult<Option<Address>>;

    // ---- routing ----------------------------------------------------------

    /// active rules, unsorted; the engine orders them.
    async fn routing_rules(&self) -> StoreResult<Vec<RoutingRule>>;
    ///
    async fn append_routing_log(&self, log: &RoutingLog) -> StoreResult<()>;
    ///
    async fn routing_logs(&self, ticket_id: TicketId) -> StoreResult<Vec<RoutingLog>>;
    ///
    async fn tag_by_name(&self, org: Option<OrgId>, name: &str) -> StoreResult<Option<Tag>>;
    ///
    async fn insert_tag(&self, tag: &Tag) -> StoreResult<()>;
    /// attach; a duplicate pair is a no-op (tag sets are sets).
    async fn attach_tag(&self, ticket_id: TicketId, tag_id: TagId) -> StoreResult<()>;
    ///
    async fn ticket_tags(&self, ticket_id: TicketId) -> StoreResult<Vec<Tag>>;

    // ---- SLA --------------------------------------------------------------

    ///
    async fn sla_definition(&self, id: SlaId) -> StoreResult<Option<SlaDefinition>>;
    ///
    async fn active_sla_for_priority(
        &self,
        priority: Priority,
    ) -> StoreResult<Option<SlaDefinition>>;
    ///
    async fn insert_sla_violation(&self, violation: &SlaViolation) -> StoreResult<()>;
    ///
    async fn sla_violations(&self, ticket_id: TicketId) -> StoreResult<Vec<SlaViolation>>;
    /// whether a violation of this type is already on record.
    async fn has_sla_violation(
        &self,
        ticket_id: TicketId,
        violation_type: ViolationType,
    ) -> StoreResult<bool>;
    /// close an open violation once the late reply/close finally happened.
    async fn resolve_sla_violation(
        &self,
        ticket_id: TicketId,
        violation_type: ViolationType,
        actual_time: time::OffsetDateTime,
        violation_minutes: i64,
    ) -> StoreResult<()>;

    // ---- attachments & templates ------------------------------------------

    ///
    async fn insert_attachment(&self, attachment: &Attachment) -> StoreResult<()>;
    ///
    async fn attachment(&self, id: AttachmentId) -> StoreResult<Option<Attachment>>;
    ///
    async fn delete_attachment(&self, id: AttachmentId) -> StoreResult<()>;
    ///
    async fn attachments(&self, ticket_id: TicketId) -> StoreResult<Vec<Attachment>>;
    ///
    async fn template(&self, id: TemplateId) -> StoreResult<Option<EmailTemplate>>;
}

/// Failure of the attachment blob backend.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// the key does not exist.
    #[error("blob '{0}' not found")]
    NotFound(String),
    /// backend failure.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque binary storage for attachment content.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    ///
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError>;
    ///
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    ///
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Stand-in when no blob backend is configured: uploads are refused,
/// deletes succeed so hard deletion and trash reaping still run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBlob;

#[async_trait::async_trait]
impl BlobStore for DisabledBlob {
    async fn put(&self, _: &str, _: Vec<u8>) -> Result<(), BlobError> {
        Err(BlobError::Unavailable(
            "no blob store configured".to_owned(),
        ))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        Err(BlobError::NotFound(key.to_owned()))
    }

    async fn delete(&self, _: &str) -> Result<(), BlobError> {
        Ok(())
    }
}
