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

use vdesk_common::{
    entity::{
        Message, MessageSender, Priority, RoutingLog, RuleAction, Tag, Ticket, TicketSource,
        TicketStatus,
    },
    types::{Address, MessageId, OrgId, TagId, TicketId, UserId},
    Clock, Error, KeyedLocks, Metrics, Store,
};
use vdesk_rule_engine::{EvalInput, RuleEngine};
use vdesk_sla::SlaTracker;

/// Invitation to generate one AI reply, emitted when a customer message
/// lands on an open, unassigned, AI-permitting ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiTrigger {
    ///
    pub ticket_id: TicketId,
    /// the customer message that caused the trigger.
    pub message_id: MessageId,
}

/// One inbound customer message, from any channel.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    ///
    pub channel: TicketSource,
    /// the authenticated or address-resolved end user, when known.
    pub user_id: Option<UserId>,
    ///
    pub organization_id: Option<OrgId>,
    ///
    pub context: String,
    ///
    pub subject: String,
    ///
    pub body: String,
    ///
    pub priority: Option<Priority>,
    /// ticket already resolved by the caller (e.g. from `In-Reply-To`);
    /// used when it still accepts continuations, ignored otherwise.
    pub ticket_hint: Option<TicketId>,
}

/// Result of an ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    ///
    pub ticket: Ticket,
    ///
    pub message: Message,
    /// present iff the ticket is AI-eligible right now.
    pub ai_trigger: Option<AiTrigger>,
    /// whether a new ticket was created (vs a continuation).
    pub created: bool,
}

/// The only writer of tickets and thread messages. Every mutation runs
/// under the per-ticket advisory lock, so transitions, appends and the AI
/// commit re-check serialize per ticket while unrelated tickets proceed.
pub struct TicketStateManager<S> {
    store: std::sync::Arc<S>,
    clock: std::sync::Arc<dyn Clock>,
    metrics: std::sync::Arc<dyn Metrics>,
    sla: SlaTracker<S>,
    locks: KeyedLocks<TicketId>,
}

impl<S: Store> TicketStateManager<S> {
    ///
    pub fn new(
        store: std::sync::Arc<S>,
        clock: std::sync::Arc<dyn Clock>,
        metrics: std::sync::Arc<dyn Metrics>,
    ) -> Self {
        Self {
            sla: SlaTracker::new(store.clone(), clock.clone()),
            store,
            clock,
            metrics,
            locks: KeyedLocks::new(),
        }
    }

    /// The SLA tracker sharing this manager's store and clock.
    #[must_use]
    pub const fn sla(&self) -> &SlaTracker<S> {
        &self.sla
    }

    // ---- ingestion --------------------------------------------------------

    /// Thread a customer message into its open continuation, or open a new
    /// ticket. New tickets run the routing rules once.
    ///
    /// # Errors
    ///
    /// * store failure
    #[tracing::instrument(skip_all, fields(channel = %request.channel, context = %request.context))]
    pub async fn ingest_customer_message(
        &self,
        request: IngestRequest,
    ) -> vdesk_common::Result<IngestOutcome> {
        // two rounds: a lost creation race or a continuation closing under
        // our feet each push us through the loop once more.
        for _ in 0..2 {
            let hinted = match request.ticket_hint {
                Some(id) => self
                    .store
                    .ticket(id)
                    .await?
                    .filter(Ticket::accepts_continuation),
                None => None,
            };

            let continuation = match hinted {
                Some(ticket) => Some(ticket),
                None => {
                    self.store
                        .find_open_continuation(
                            &request.context,
                            &request.subject,
                            request.user_id,
                        )
                        .await?
                }
            };

            if let Some(ticket) = continuation {
                if let Some(outcome) = self.continue_ticket(ticket.id, &request).await? {
                    return Ok(outcome);
                }
                // the continuation closed between lookup and lock.
            }

            if let Some(outcome) = self.create_ticket(&request).await? {
                return Ok(outcome);
            }
        }
        Err(Error::Transient(
            "ticket creation keeps racing, retry the request".to_owned(),
        ))
    }

    /// Append to an existing ticket; `None` when it no longer accepts
    /// continuations and the caller must create a fresh one.
    async fn continue_ticket(
        &self,
        ticket_id: TicketId,
        request: &IngestRequest,
    ) -> vdesk_common::Result<Option<IngestOutcome>> {
        let _guard = self.locks.lock(ticket_id).await;

        let Some(mut ticket) = self.store.ticket(ticket_id).await? else {
            return Ok(None);
        };
        if !ticket.accepts_continuation() {
            return Ok(None);
        }

        let message = self
            .append_unlocked(&mut ticket, MessageSender::Customer, &request.body, None, None)
            .await?;
        self.metrics.incr("ticket.message.customer");

        let ai_trigger = ai_trigger_for(&ticket, &message);
        Ok(Some(IngestOutcome {
            ticket,
            message,
            ai_trigger,
            created: false,
        }))
    }

    /// `None` when the conditional insert lost against a concurrent
    /// creation of the same continuation triple.
    async fn create_ticket(
        &self,
        request: &IngestRequest,
    ) -> vdesk_common::Result<Option<IngestOutcome>> {
        let now = self.clock.now();
        let priority = request.priority.unwrap_or(Priority::Medium);
        let sla_id = self
            .sla
            .policy_for(priority)
            .await?
            .map(|definition| definition.id);

        let mut ticket = Ticket {
            id: TicketId::new(),
            organization_id: request.organization_id,
            user_id: request.user_id,
            context: request.context.clone(),
            subject: request.subject.clone(),
            status: TicketStatus::Open,
            priority,
            source: request.channel,
            category: None,
            assigned_to: None,
            sla_id,
            is_deleted: false,
            deleted_at: None,
            first_response_at: None,
            last_response_at: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        if !self.store.create_ticket(&ticket).await? {
            return Ok(None);
        }
        self.metrics.incr("ticket.created");

        let _guard = self.locks.lock(ticket.id).await;
        let message = self
            .append_unlocked(&mut ticket, MessageSender::Customer, &request.body, None, None)
            .await?;

        self.apply_routing(&mut ticket, &request.body).await?;

        let ai_trigger = ai_trigger_for(&ticket, &message);
        Ok(Some(IngestOutcome {
            ticket,
            message,
            ai_trigger,
            created: true,
        }))
    }

    /// Customer reply on an explicitly named ticket (the web reply path);
    /// unlike ingestion it refuses closed or foreign tickets.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] on unknown or trashed tickets
    /// * [`Error::Forbidden`] when the user does not own the ticket
    /// * [`Error::InvalidTransition`] on closed tickets
    pub async fn reply_as_customer(
        &self,
        ticket_id: TicketId,
        user_id: UserId,
        body: &str,
    ) -> vdesk_common::Result<IngestOutcome> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if ticket.user_id.is_some() && ticket.user_id != Some(user_id) {
            return Err(Error::Forbidden("not the ticket owner".to_owned()));
        }
        if ticket.status == TicketStatus::Closed {
            return Err(Error::InvalidTransition(
                "ticket is closed, open a new one".to_owned(),
            ));
        }

        let message = self
            .append_unlocked(&mut ticket, MessageSender::Customer, body, None, None)
            .await?;
        self.metrics.incr("ticket.message.customer");

        let ai_trigger = ai_trigger_for(&ticket, &message);
        Ok(IngestOutcome {
            ticket,
            message,
            ai_trigger,
            created: false,
        })
    }

    // ---- thread appends ---------------------------------------------------

    /// Commit an AI reply. The eligibility re-check runs here, under the
    /// same lock every other mutation takes: a ticket that got assigned or
    /// closed while the model was generating rejects the commit.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`] when the ticket is no longer open and
    ///   unassigned (the reply must be discarded, not stored)
    pub async fn append_ai_reply(
        &self,
        ticket_id: TicketId,
        text: &str,
        confidence: f64,
        success: bool,
    ) -> vdesk_common::Result<Message> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if !ticket.accepts_ai_reply() {
            self.metrics.incr("ai.commit.rejected");
            return Err(Error::InvalidTransition(format!(
                "ticket is {} and no longer accepts AI replies",
                ticket.status
            )));
        }

        let message = self
            .append_unlocked(
                &mut ticket,
                MessageSender::Ai,
                text,
                Some(confidence),
                Some(success),
            )
            .await?;
        self.metrics.incr("ticket.message.ai");
        Ok(message)
    }

    /// Append an admin reply and stamp the response timestamps; the first
    /// one feeds the response-time SLA.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`] on closed tickets
    pub async fn append_admin_reply(
        &self,
        ticket_id: TicketId,
        admin: &Address,
        text: &str,
    ) -> vdesk_common::Result<Message> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if ticket.status == TicketStatus::Closed {
            return Err(Error::InvalidTransition(
                "cannot reply on a closed ticket".to_owned(),
            ));
        }

        let now = self.clock.now();
        let first_response = ticket.first_response_at.is_none();
        if first_response {
            ticket.first_response_at = Some(now);
        }
        ticket.last_response_at = Some(now);

        let message = self
            .append_unlocked(&mut ticket, MessageSender::Admin, text, None, None)
            .await?;
        self.metrics.incr("ticket.message.admin");
        tracing::debug!(ticket = %ticket_id, %admin, "Admin reply appended.");

        if first_response {
            self.sla.record_first_response(&ticket, now).await?;
        }
        Ok(message)
    }

    /// Leave a `system` note on the thread (escalation, rate limiting,
    /// generation failures).
    ///
    /// # Errors
    ///
    /// * store failure, unknown ticket
    pub async fn append_system_note(
        &self,
        ticket_id: TicketId,
        text: &str,
    ) -> vdesk_common::Result<Message> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;
        self.append_unlocked(&mut ticket, MessageSender::System, text, None, None)
            .await
    }

    // ---- state transitions ------------------------------------------------

    /// `open → human_assigned` with an owner. Idempotent for the same
    /// admin, forbidden on closed tickets.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`]
    pub async fn assign_to_admin(
        &self,
        ticket_id: TicketId,
        admin: Address,
    ) -> vdesk_common::Result<Ticket> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if ticket.assigned_to.as_ref() == Some(&admin) {
            return Ok(ticket);
        }
        if ticket.status == TicketStatus::Closed {
            return Err(Error::InvalidTransition(
                "cannot assign a closed ticket".to_owned(),
            ));
        }

        ticket.status = TicketStatus::HumanAssigned;
        ticket.assigned_to = Some(admin.clone());
        self.persist(&mut ticket).await?;
        self.metrics.incr("ticket.assigned");

        self.append_unlocked(
            &mut ticket,
            MessageSender::System,
            &format!("Conversation taken over by {admin}."),
            None,
            None,
        )
        .await?;
        Ok(ticket)
    }

    /// `open → human_assigned` without naming an owner: the customer asked
    /// for a human.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`] on closed tickets
    pub async fn escalate(&self, ticket_id: TicketId) -> vdesk_common::Result<Ticket> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        match ticket.status {
            TicketStatus::HumanAssigned => return Ok(ticket),
            TicketStatus::Closed => {
                return Err(Error::InvalidTransition(
                    "cannot escalate a closed ticket".to_owned(),
                ))
            }
            TicketStatus::Open => {}
        }

        ticket.status = TicketStatus::HumanAssigned;
        self.persist(&mut ticket).await?;
        self.metrics.incr("ticket.escalated");

        self.append_unlocked(
            &mut ticket,
            MessageSender::System,
            "Escalated to a human agent.",
            None,
            None,
        )
        .await?;
        Ok(ticket)
    }

    /// Close from any live state and stamp `resolved_at`.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] on trashed tickets
    pub async fn close_ticket(&self, ticket_id: TicketId) -> vdesk_common::Result<Ticket> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if ticket.status == TicketStatus::Closed {
            return Ok(ticket);
        }

        let now = self.clock.now();
        ticket.status = TicketStatus::Closed;
        ticket.resolved_at = Some(now);
        self.persist(&mut ticket).await?;
        self.metrics.incr("ticket.closed");

        self.sla.record_resolution(&ticket, now).await?;
        Ok(ticket)
    }

    /// Change priority and re-link the matching active SLA policy.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`]
    pub async fn update_priority(
        &self,
        ticket_id: TicketId,
        priority: Priority,
    ) -> vdesk_common::Result<Ticket> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self.load_live(ticket_id).await?;

        if ticket.priority == priority {
            return Ok(ticket);
        }

        ticket.priority = priority;
        ticket.sla_id = self
            .sla
            .policy_for(priority)
            .await?
            .map(|definition| definition.id);
        self.persist(&mut ticket).await?;
        Ok(ticket)
    }

    // ---- trash ------------------------------------------------------------

    /// Soft-delete a batch. All-or-nothing: every ticket must exist and be
    /// closed, otherwise nothing is written.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`] naming the offending ticket
    pub async fn soft_delete(&self, ticket_ids: &[TicketId]) -> vdesk_common::Result<()> {
        let (_guards, mut tickets) = self.lock_batch(ticket_ids).await?;

        for ticket in &tickets {
            if ticket.status != TicketStatus::Closed {
                return Err(Error::InvalidTransition(format!(
                    "ticket {} is {}, only closed tickets can be deleted",
                    ticket.id, ticket.status
                )));
            }
            if ticket.is_deleted {
                return Err(Error::InvalidTransition(format!(
                    "ticket {} is already deleted",
                    ticket.id
                )));
            }
        }

        let now = self.clock.now();
        for ticket in &mut tickets {
            ticket.is_deleted = true;
            ticket.deleted_at = Some(now);
            self.persist(ticket).await?;
        }
        self.metrics.incr("ticket.soft_deleted");
        Ok(())
    }

    /// Undo a soft delete. All-or-nothing like [`Self::soft_delete`];
    /// every field except the deletion markers survives the round trip.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidTransition`] when a ticket is not in the trash
    pub async fn restore(&self, ticket_ids: &[TicketId]) -> vdesk_common::Result<()> {
        let (_guards, mut tickets) = self.lock_batch(ticket_ids).await?;

        for ticket in &tickets {
            if !ticket.is_deleted {
                return Err(Error::InvalidTransition(format!(
                    "ticket {} is not in the trash",
                    ticket.id
                )));
            }
        }

        for ticket in &mut tickets {
            ticket.is_deleted = false;
            ticket.deleted_at = None;
            self.persist(ticket).await?;
        }
        self.metrics.incr("ticket.restored");
        Ok(())
    }

    // ---- queries ----------------------------------------------------------

    /// A live (non-trashed) ticket.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`]
    pub async fn ticket(&self, ticket_id: TicketId) -> vdesk_common::Result<Ticket> {
        self.load_live(ticket_id).await
    }

    /// The thread of a ticket in order.
    ///
    /// # Errors
    ///
    /// * store failure
    pub async fn thread(&self, ticket_id: TicketId) -> vdesk_common::Result<Vec<Message>> {
        Ok(self.store.messages(ticket_id).await?)
    }

    /// The trash, for the admin listing.
    ///
    /// # Errors
    ///
    /// * store failure
    pub async fn trash(&self) -> vdesk_common::Result<Vec<Ticket>> {
        Ok(self.store.deleted_tickets().await?)
    }

    // ---- internals --------------------------------------------------------

    async fn load_live(&self, ticket_id: TicketId) -> vdesk_common::Result<Ticket> {
        self.store
            .ticket(ticket_id)
            .await?
            .filter(|ticket| !ticket.is_deleted)
            .ok_or_else(|| Error::not_found("ticket", ticket_id))
    }

    /// Lock a batch in ascending id order so concurrent batches cannot
    /// deadlock, then load every row.
    async fn lock_batch(
        &self,
        ticket_ids: &[TicketId],
    ) -> vdesk_common::Result<(Vec<vdesk_common::KeyedGuard<'_, TicketId>>, Vec<Ticket>)> {
        let mut ids = ticket_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.locks.lock(*id).await);
        }

        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            tickets.push(
                self.store
                    .ticket(id)
                    .await?
                    .ok_or_else(|| Error::not_found("ticket", id))?,
            );
        }
        Ok((guards, tickets))
    }

    /// Stamp, append and bump `updated_at`; the caller holds the lock.
    async fn append_unlocked(
        &self,
        ticket: &mut Ticket,
        sender: MessageSender,
        text: &str,
        confidence: Option<f64>,
        success: Option<bool>,
    ) -> vdesk_common::Result<Message> {
        let message = Message {
            id: MessageId::new(),
            ticket_id: ticket.id,
            sender,
            message: text.to_owned(),
            confidence,
            success,
            created_at: self.clock.now(),
        };
        self.store.append_message(&message).await?;
        self.persist(ticket).await?;
        Ok(message)
    }

    async fn persist(&self, ticket: &mut Ticket) -> vdesk_common::Result<()> {
        ticket.updated_at = self.clock.now();
        debug_assert!(ticket.is_consistent(), "inconsistent ticket {ticket:?}");
        self.store.update_ticket(ticket).await?;
        Ok(())
    }

    /// First-match routing on a fresh ticket; the winning action mutates
    /// the ticket through the same code paths the admin operations use.
    async fn apply_routing(
        &self,
        ticket: &mut Ticket,
        first_message: &str,
    ) -> vdesk_common::Result<()> {
        let rules = self.store.routing_rules().await?;
        if rules.is_empty() {
            return Ok(());
        }
        let engine = RuleEngine::new(rules);
        if engine.is_empty() {
            return Ok(());
        }

        let tag_names = self
            .store
            .ticket_tags(ticket.id)
            .await?
            .into_iter()
            .map(|tag| tag.name)
            .collect::<Vec<_>>();

        let Some(hit) = engine.evaluate(&EvalInput {
            ticket,
            first_message,
            tag_names: &tag_names,
        }) else {
            return Ok(());
        };

        match &hit.action {
            RuleAction::AssignToAgent(agent) => {
                if ticket.assigned_to.as_ref() != Some(agent) {
                    ticket.status = TicketStatus::HumanAssigned;
                    ticket.assigned_to = Some(agent.clone());
                    self.persist(ticket).await?;
                }
            }
            RuleAction::SetPriority(priority) => {
                if ticket.priority != *priority {
                    ticket.priority = *priority;
                    ticket.sla_id = self
                        .sla
                        .policy_for(*priority)
                        .await?
                        .map(|definition| definition.id);
                    self.persist(ticket).await?;
                }
            }
            RuleAction::AddTag(name) | RuleAction::AssignToGroup(name) => {
                self.attach_tag(ticket, name).await?;
            }
            RuleAction::SetCategory(category) => {
                if ticket.category.as_deref() != Some(category) {
                    ticket.category = Some(category.clone());
                    self.persist(ticket).await?;
                }
            }
        }

        self.store
            .append_routing_log(&RoutingLog {
                ticket_id: ticket.id,
                rule_id: hit.rule_id,
                rule_name: hit.rule_name.clone(),
                action_taken: hit.action.describe(),
                matched_conditions: hit.matched_conditions,
                created_at: self.clock.now(),
            })
            .await?;
        self.metrics.incr("routing.matched");
        Ok(())
    }

    async fn attach_tag(&self, ticket: &Ticket, name: &str) -> vdesk_common::Result<()> {
        let tag = match self
            .store
            .tag_by_name(ticket.organization_id, name)
            .await?
        {
            Some(tag) => tag,
            None => {
                let tag = Tag {
                    id: TagId::new(),
                    organization_id: ticket.organization_id,
                    name: name.to_owned(),
                    color: None,
                    created_at: self.clock.now(),
                };
                self.store.insert_tag(&tag).await?;
                tag
            }
        };
        self.store.attach_tag(ticket.id, tag.id).await?;
        Ok(())
    }
}

fn ai_trigger_for(ticket: &Ticket, message: &Message) -> Option<AiTrigger> {
    ticket.accepts_ai_reply().then_some(AiTrigger {
        ticket_id: ticket.id,
        message_id: message.id,
    })
}
