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

//! Volatile collaborator implementations: an in-memory [`Store`] and
//! [`BlobStore`], a hand-driven clock, a scripted generator. Used by the
//! test suites and by the evaluation mode of the binary.

use crate::{
    entity::{
        Attachment, EmailAccount, EmailMessage, EmailStatus, EmailTemplate, Message, Priority,
        RoutingLog, RoutingRule, SlaDefinition, SlaViolation, Tag, Ticket, ViolationType,
    },
    types::{
        AccountId, Address, AttachmentId, OrgId, SlaId, TagId, TemplateId, TicketId, UserId,
    },
    BlobError, BlobStore, Clock, GenerateError, GeneratedReply, RandomSource, Store, StoreError,
    StoreResult, TextGenerator,
};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Default)]
struct Tables {
    tickets: HashMap<TicketId, Ticket>,
    messages: Vec<Message>,
    emails: Vec<EmailMessage>,
    accounts: HashMap<AccountId, EmailAccount>,
    users: HashMap<UserId, Address>,
    rules: Vec<RoutingRule>,
    routing_logs: Vec<RoutingLog>,
    tags: HashMap<TagId, Tag>,
    ticket_tags: HashSet<(TicketId, TagId)>,
    slas: HashMap<SlaId, SlaDefinition>,
    violations: Vec<SlaViolation>,
    attachments: HashMap<AttachmentId, Attachment>,
    templates: HashMap<TemplateId, EmailTemplate>,
}

/// An in-memory datastore with the same observable semantics the real
/// backend guarantees: per-ticket write order and the
/// `(account, message_id)` unique key.
#[derive(Default)]
pub struct MemoryStore {
    tables: std::sync::Mutex<Tables>,
    fail_everything: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent query fail, to exercise `StoreUnavailable`
    /// paths.
    pub fn set_failing(&self, failing: bool) {
        self.fail_everything
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        if self
            .fail_everything
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::unavailable("injected failure"));
        }
        #[allow(clippy::expect_used)]
        Ok(self.tables.lock().expect("memory store poisoned"))
    }

    // ---- seeding ----------------------------------------------------------

    /// Register a user address.
    pub fn seed_user(&self, user_id: UserId, address: Address) {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .users
            .insert(user_id, address);
    }

    ///
    pub fn seed_account(&self, account: EmailAccount) {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .accounts
            .insert(account.id, account);
    }

    ///
    pub fn seed_rule(&self, rule: RoutingRule) {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .rules
            .push(rule);
    }

    ///
    pub fn seed_sla(&self, definition: SlaDefinition) {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .slas
            .insert(definition.id, definition);
    }

    ///
    pub fn seed_template(&self, template: EmailTemplate) {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .templates
            .insert(template.id, template);
    }

    /// All routing log rows, for assertions.
    #[must_use]
    pub fn routing_log_rows(&self) -> Vec<RoutingLog> {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .routing_logs
            .clone()
    }

    /// All email rows, for assertions.
    #[must_use]
    pub fn email_rows(&self) -> Vec<EmailMessage> {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .emails
            .clone()
    }

    /// All violation rows, for assertions.
    #[must_use]
    pub fn violation_rows(&self) -> Vec<SlaViolation> {
        #[allow(clippy::expect_used)]
        self.tables
            .lock()
            .expect("memory store poisoned")
            .violations
            .clone()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn create_ticket(&self, ticket: &Ticket) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let conflict = ticket.accepts_continuation()
            && tables.tickets.values().any(|existing| {
                existing.accepts_continuation()
                    && existing.context == ticket.context
                    && existing.subject == ticket.subject
                    && existing.user_id == ticket.user_id
            });
        if conflict {
            return Ok(false);
        }
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(true)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> StoreResult<()> {
        self.lock()?.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        Ok(self.lock()?.tickets.get(&id).cloned())
    }

    async fn tickets(&self, ids: &[TicketId]) -> StoreResult<Vec<Ticket>> {
        let tables = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.tickets.get(id).cloned())
            .collect())
    }

    async fn find_open_continuation(
        &self,
        context: &str,
        subject: &str,
        user_id: Option<UserId>,
    ) -> StoreResult<Option<Ticket>> {
        Ok(self
            .lock()?
            .tickets
            .values()
            .find(|ticket| {
                ticket.accepts_continuation()
                    && ticket.context == context
                    && ticket.subject == subject
                    && ticket.user_id == user_id
            })
            .cloned())
    }

    async fn open_tickets_with_sla(&self) -> StoreResult<Vec<Ticket>> {
        Ok(self
            .lock()?
            .tickets
            .values()
            .filter(|ticket| {
                !ticket.is_deleted
                    && ticket.sla_id.is_some()
                    && ticket.resolved_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn deleted_tickets(&self) -> StoreResult<Vec<Ticket>> {
        let mut trash = self
            .lock()?
            .tickets
            .values()
            .filter(|ticket| ticket.is_deleted)
            .cloned()
            .collect::<Vec<_>>();
        trash.sort_by_key(|ticket| std::cmp::Reverse(ticket.deleted_at));
        Ok(trash)
    }

    async fn deleted_tickets_before(
        &self,
        cutoff: time::OffsetDateTime,
    ) -> StoreResult<Vec<Ticket>> {
        Ok(self
            .lock()?
            .tickets
            .values()
            .filter(|ticket| {
                ticket.is_deleted && ticket.deleted_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn delete_ticket_cascade(&self, id: TicketId) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.tickets.remove(&id);
        tables.messages.retain(|message| message.ticket_id != id);
        tables
            .emails
            .retain(|email| email.ticket_id != Some(id));
        tables.ticket_tags.retain(|(ticket, _)| *ticket != id);
        tables
            .attachments
            .retain(|_, attachment| attachment.ticket_id != id);
        tables
            .violations
            .retain(|violation| violation.ticket_id != id);
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> StoreResult<()> {
        self.lock()?.messages.push(message.clone());
        Ok(())
    }

    async fn messages(&self, ticket_id: TicketId) -> StoreResult<Vec<Message>> {
        Ok(self
            .lock()?
            .messages
            .iter()
            .filter(|message| message.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn insert_email(&self, email: &EmailMessage) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let duplicate = tables.emails.iter().any(|existing| {
            existing.email_account_id == email.email_account_id
                && existing.message_id == email.message_id
        });
        if duplicate {
            return Ok(false);
        }
        tables.emails.push(email.clone());
        Ok(true)
    }

    async fn email_exists(&self, account: AccountId, message_id: &str) -> StoreResult<bool> {
        Ok(self.lock()?.emails.iter().any(|email| {
            email.email_account_id == account && email.message_id == message_id
        }))
    }

    async fn update_email(&self, email: &EmailMessage) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .emails
            .iter_mut()
            .find(|existing| existing.id == email.id)
        {
            *existing = email.clone();
        }
        Ok(())
    }

    async fn email_by_rfc_message_id(
        &self,
        message_id: &str,
    ) -> StoreResult<Option<EmailMessage>> {
        Ok(self
            .lock()?
            .emails
            .iter()
            .find(|email| email.message_id == message_id)
            .cloned())
    }

    async fn emails(&self, ticket_id: TicketId) -> StoreResult<Vec<EmailMessage>> {
        Ok(self
            .lock()?
            .emails
            .iter()
            .filter(|email| email.ticket_id == Some(ticket_id))
            .cloned()
            .collect())
    }

    async fn latest_inbound_email(
        &self,
        ticket_id: TicketId,
    ) -> StoreResult<Option<EmailMessage>> {
        Ok(self
            .lock()?
            .emails
            .iter()
            .filter(|email| {
                email.ticket_id == Some(ticket_id)
                    && email.direction == crate::entity::EmailDirection::Inbound
                    && email.status != EmailStatus::Filtered
            })
            .last()
            .cloned())
    }

    async fn first_email(&self, ticket_id: TicketId) -> StoreResult<Option<EmailMessage>> {
        Ok(self
            .lock()?
            .emails
            .iter()
            .find(|email| {
                email.ticket_id == Some(ticket_id) && email.status != EmailStatus::Filtered
            })
            .cloned())
    }

    async fn email_accounts(&self) -> StoreResult<Vec<EmailAccount>> {
        Ok(self.lock()?.accounts.values().cloned().collect())
    }

    async fn email_account(&self, id: AccountId) -> StoreResult<Option<EmailAccount>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn update_email_account(&self, account: &EmailAccount) -> StoreResult<()> {
        self.lock()?.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn active_accounts(&self, org: Option<OrgId>) -> StoreResult<Vec<EmailAccount>> {
        let mut accounts = self
            .lock()?
            .accounts
            .values()
            .filter(|account| account.is_active && account.organization_id == org)
            .cloned()
            .collect::<Vec<_>>();
        accounts.sort_by_key(|account| std::cmp::Reverse(account.is_default));
        Ok(accounts)
    }

    async fn is_known_user(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.lock()?.users.values().any(|known| known == address))
    }

    async fn user_by_address(&self, address: &Address) -> StoreResult<Option<UserId>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|(_, known)| *known == address)
            .map(|(user_id, _)| *user_id))
    }

    async fn user_address(&self, user_id: UserId) -> StoreResult<Option<Address>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn routing_rules(&self) -> StoreResult<Vec<RoutingRule>> {
        Ok(self.lock()?.rules.clone())
    }

    async fn append_routing_log(&self, log: &RoutingLog) -> StoreResult<()> {
        self.lock()?.routing_logs.push(log.clone());
        Ok(())
    }

    async fn routing_logs(&self, ticket_id: TicketId) -> StoreResult<Vec<RoutingLog>> {
        Ok(self
            .lock()?
            .routing_logs
            .iter()
            .filter(|log| log.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn tag_by_name(&self, org: Option<OrgId>, name: &str) -> StoreResult<Option<Tag>> {
        Ok(self
            .lock()?
            .tags
            .values()
            .find(|tag| tag.organization_id == org && tag.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn insert_tag(&self, tag: &Tag) -> StoreResult<()> {
        self.lock()?.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn attach_tag(&self, ticket_id: TicketId, tag_id: TagId) -> StoreResult<()> {
        self.lock()?.ticket_tags.insert((ticket_id, tag_id));
        Ok(())
    }

    async fn ticket_tags(&self, ticket_id: TicketId) -> StoreResult<Vec<Tag>> {
        let tables = self.lock()?;
        Ok(tables
            .ticket_tags
            .iter()
            .filter(|(ticket, _)| *ticket == ticket_id)
            .filter_map(|(_, tag_id)| tables.tags.get(tag_id).cloned())
            .collect())
    }

    async fn sla_definition(&self, id: SlaId) -> StoreResult<Option<SlaDefinition>> {
        Ok(self.lock()?.slas.get(&id).cloned())
    }

    async fn active_sla_for_priority(
        &self,
        priority: Priority,
    ) -> StoreResult<Option<SlaDefinition>> {
        Ok(self
            .lock()?
            .slas
            .values()
            .find(|definition| definition.is_active && definition.priority == priority)
            .cloned())
    }

    async fn insert_sla_violation(&self, violation: &SlaViolation) -> StoreResult<()> {
        self.lock()?.violations.push(violation.clone());
        Ok(())
    }

    async fn sla_violations(&self, ticket_id: TicketId) -> StoreResult<Vec<SlaViolation>> {
        Ok(self
            .lock()?
            .violations
            .iter()
            .filter(|violation| violation.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn has_sla_violation(
        &self,
        ticket_id: TicketId,
        violation_type: ViolationType,
    ) -> StoreResult<bool> {
        Ok(self.lock()?.violations.iter().any(|violation| {
            violation.ticket_id == ticket_id && violation.violation_type == violation_type
        }))
    }

    async fn resolve_sla_violation(
        &self,
        ticket_id: TicketId,
        violation_type: ViolationType,
        actual_time: time::OffsetDateTime,
        violation_minutes: i64,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(violation) = tables.violations.iter_mut().find(|violation| {
            violation.ticket_id == ticket_id
                && violation.violation_type == violation_type
                && !violation.is_resolved
        }) {
            violation.actual_time = Some(actual_time);
            violation.violation_minutes = Some(violation_minutes);
            violation.is_resolved = true;
        }
        Ok(())
    }

    async fn insert_attachment(&self, attachment: &Attachment) -> StoreResult<()> {
        self.lock()?
            .attachments
            .insert(attachment.id, attachment.clone());
        Ok(())
    }

    async fn attachment(&self, id: AttachmentId) -> StoreResult<Option<Attachment>> {
        Ok(self.lock()?.attachments.get(&id).cloned())
    }

    async fn delete_attachment(&self, id: AttachmentId) -> StoreResult<()> {
        self.lock()?.attachments.remove(&id);
        Ok(())
    }

    async fn attachments(&self, ticket_id: TicketId) -> StoreResult<Vec<Attachment>> {
        Ok(self
            .lock()?
            .attachments
            .values()
            .filter(|attachment| attachment.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn template(&self, id: TemplateId) -> StoreResult<Option<EmailTemplate>> {
        Ok(self.lock()?.templates.get(&id).cloned())
    }
}

/// In-memory blob backend.
#[derive(Default)]
pub struct MemoryBlob {
    blobs: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlob {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.blobs.lock().expect("memory blob poisoned").len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlob {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        #[allow(clippy::expect_used)]
        self.blobs
            .lock()
            .expect("memory blob poisoned")
            .insert(key.to_owned(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        #[allow(clippy::expect_used)]
        self.blobs
            .lock()
            .expect("memory blob poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_owned()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        #[allow(clippy::expect_used)]
        self.blobs
            .lock()
            .expect("memory blob poisoned")
            .remove(key);
        Ok(())
    }
}

/// A clock the test drives by hand. Every read bumps it one millisecond so
/// consecutive stamps are strictly increasing.
pub struct ManualClock {
    now: std::sync::Mutex<time::OffsetDateTime>,
}

impl ManualClock {
    /// Start at an arbitrary fixed instant.
    #[must_use]
    pub fn new(start: time::OffsetDateTime) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    /// Jump forward.
    pub fn advance(&self, by: std::time::Duration) {
        #[allow(clippy::expect_used)]
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(time::macros::datetime!(2023-03-06 09:00 UTC))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> time::OffsetDateTime {
        #[allow(clippy::expect_used)]
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now += time::Duration::milliseconds(1);
        *now
    }
}

/// Jitter-free randomness for deterministic backoff tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRandom;

impl RandomSource for FixedRandom {
    fn jitter_ms(&self, _: u64) -> u64 {
        0
    }
}

/// A generator that replays scripted outcomes, then falls back to a canned
/// reply. Records how often it was called.
pub struct ScriptedGenerator {
    script: std::sync::Mutex<VecDeque<Result<GeneratedReply, GenerateError>>>,
    calls: std::sync::atomic::AtomicUsize,
    delay: std::time::Duration,
}

impl ScriptedGenerator {
    /// Always answer with the canned reply.
    #[must_use]
    pub fn canned() -> Self {
        Self {
            script: std::sync::Mutex::new(VecDeque::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
            delay: std::time::Duration::ZERO,
        }
    }

    /// Queue one scripted outcome ahead of the canned fallback.
    #[must_use]
    pub fn then(self, outcome: Result<GeneratedReply, GenerateError>) -> Self {
        #[allow(clippy::expect_used)]
        self.script
            .lock()
            .expect("script poisoned")
            .push_back(outcome);
        self
    }

    /// Make every call take this long, to widen race windows in tests.
    #[must_use]
    pub const fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of generation calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _context: &str,
        _subject: &str,
        _history: &[Message],
        _preamble: &str,
    ) -> Result<GeneratedReply, GenerateError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = {
            #[allow(clippy::expect_used)]
            self.script.lock().expect("script poisoned").pop_front()
        };
        scripted.unwrap_or_else(|| {
            Ok(GeneratedReply {
                text: "Thanks for reaching out; an agent will confirm shortly.".to_owned(),
                confidence: 0.87,
            })
        })
    }
}
