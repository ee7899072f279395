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

//! The channel-independent half of inbound email handling: dedup,
//! classification with its never-filter exceptions, ticket binding and
//! attachment extraction. The IMAP worker and the `/webhooks/email` ingress
//! both end up here.

use vdesk_classifier::{Category, Classifier, Sample};
use vdesk_common::{
    entity::{
        EmailAccount, EmailDirection, EmailMessage, EmailStatus, Ticket, TicketSource,
    },
    types::{EmailMessageId, TicketId},
    Clock, Metrics, Requester, Store,
};
use vdesk_config::field::FieldFilter;
use vdesk_mail::ParsedEmail;
use vdesk_ticket::{AttachmentCoordinator, IngestOutcome, IngestRequest, TicketStateManager};

/// What the pipeline did with one inbound email.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// `(account, message_id)` was already ingested; nothing written.
    Duplicate,
    /// classified away; a `filtered` row exists iff logging is on.
    Filtered(Category),
    /// threaded into a ticket (existing or new).
    Ingested(Box<IngestOutcome>),
}

/// Shared ingestion pipeline.
pub struct IngestPipeline<S> {
    store: std::sync::Arc<S>,
    manager: std::sync::Arc<TicketStateManager<S>>,
    attachments: Option<std::sync::Arc<AttachmentCoordinator<S>>>,
    classifier: Classifier,
    settings: FieldFilter,
    clock: std::sync::Arc<dyn Clock>,
    metrics: std::sync::Arc<dyn Metrics>,
    /// where AI triggers of email tickets go; `None` when AI is off.
    ai_triggers: Option<tokio::sync::mpsc::Sender<vdesk_ticket::AiTrigger>>,
}

impl<S: Store> IngestPipeline<S> {
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: std::sync::Arc<S>,
        manager: std::sync::Arc<TicketStateManager<S>>,
        attachments: Option<std::sync::Arc<AttachmentCoordinator<S>>>,
        classifier: Classifier,
        settings: FieldFilter,
        clock: std::sync::Arc<dyn Clock>,
        metrics: std::sync::Arc<dyn Metrics>,
        ai_triggers: Option<tokio::sync::mpsc::Sender<vdesk_ticket::AiTrigger>>,
    ) -> Self {
        Self {
            store,
            manager,
            attachments,
            classifier,
            settings,
            clock,
            metrics,
            ai_triggers,
        }
    }

    /// Run one parsed email through dedup → classify → bind → attach.
    ///
    /// # Errors
    ///
    /// * store failure
    #[tracing::instrument(skip_all, fields(account = %account.address, message_id = %parsed.message_id))]
    pub async fn process(
        &self,
        account: &EmailAccount,
        parsed: ParsedEmail,
    ) -> vdesk_common::Result<PipelineOutcome> {
        if self
            .store
            .email_exists(account.id, &parsed.message_id)
            .await?
        {
            self.metrics.incr("ingest.duplicate");
            tracing::debug!("Duplicate delivery, acknowledged without effect.");
            return Ok(PipelineOutcome::Duplicate);
        }

        // resolve the reply target first: it doubles as a filter exception.
        let reply_ticket = self.resolve_reply_target(&parsed).await?;

        if self.settings.enabled {
            if let Some(category) = self.classify(account, &parsed, reply_ticket.is_some()).await? {
                return Ok(PipelineOutcome::Filtered(category));
            }
        }

        let user_id = self.store.user_by_address(&parsed.from).await?;
        let body = parsed
            .body_text
            .clone()
            .or_else(|| parsed.body_html.clone())
            .unwrap_or_else(|| "(empty message)".to_owned());

        let outcome = self
            .manager
            .ingest_customer_message(IngestRequest {
                channel: TicketSource::Email,
                user_id,
                organization_id: account.organization_id,
                // one mailbox, one conversation namespace.
                context: account.address.full().to_owned(),
                subject: parsed.subject.clone(),
                body,
                priority: None,
                ticket_hint: reply_ticket.map(|ticket| ticket.id),
            })
            .await?;

        self.persist_email_row(account, &parsed, Some(outcome.ticket.id), EmailStatus::Received)
            .await?;
        self.upload_attachments(outcome.ticket.id, &parsed).await;

        if let (Some(sender), Some(trigger)) = (&self.ai_triggers, outcome.ai_trigger) {
            if sender.send(trigger).await.is_err() {
                tracing::warn!("AI trigger channel closed, trigger dropped.");
            }
        }

        self.metrics.incr("ingest.accepted");
        Ok(PipelineOutcome::Ingested(Box::new(outcome)))
    }

    /// The email webhook ingress: same pipeline, account resolved by id.
    ///
    /// # Errors
    ///
    /// * [`vdesk_common::Error::NotFound`] on unknown account
    pub async fn ingest_webhook(
        &self,
        account_id: vdesk_common::types::AccountId,
        parsed: ParsedEmail,
    ) -> vdesk_common::Result<PipelineOutcome> {
        let account = self
            .store
            .email_account(account_id)
            .await?
            .ok_or_else(|| vdesk_common::Error::not_found("email_account", account_id))?;
        self.process(&account, parsed).await
    }

    /// `Some(ticket)` when `In-Reply-To` resolves to a stored email bound
    /// to a ticket that still accepts continuations.
    async fn resolve_reply_target(
        &self,
        parsed: &ParsedEmail,
    ) -> vdesk_common::Result<Option<Ticket>> {
        let Some(in_reply_to) = &parsed.in_reply_to else {
            return Ok(None);
        };
        let Some(referenced) = self.store.email_by_rfc_message_id(in_reply_to).await? else {
            return Ok(None);
        };
        let Some(ticket_id) = referenced.ticket_id else {
            return Ok(None);
        };
        Ok(self
            .store
            .ticket(ticket_id)
            .await?
            .filter(Ticket::accepts_continuation))
    }

    /// `Some(category)` when the email must be filtered out.
    async fn classify(
        &self,
        account: &EmailAccount,
        parsed: &ParsedEmail,
        is_reply: bool,
    ) -> vdesk_common::Result<Option<Category>> {
        let verdict = self.classifier.classify(&Sample {
            from: &parsed.from,
            subject: &parsed.subject,
            body_text: parsed.body_text.as_deref(),
            has_list_unsubscribe: parsed.has_list_unsubscribe,
        });

        let filtered = match verdict.category {
            Category::Ham => false,
            Category::Spam => true,
            Category::Promotion => self.settings.filter_promotions,
        };
        if !filtered {
            return Ok(None);
        }

        // never filter known correspondents or live conversations.
        if is_reply {
            tracing::info!(category = %verdict.category, "Filter overridden: reply to a live ticket.");
            return Ok(None);
        }
        if self.store.is_known_user(&parsed.from).await? {
            tracing::info!(category = %verdict.category, "Filter overridden: registered user.");
            return Ok(None);
        }

        self.metrics.incr("ingest.filtered");
        tracing::info!(
            category = %verdict.category,
            reasons = ?verdict.reasons,
            "Inbound email filtered."
        );
        if self.settings.log_filtered {
            self.persist_email_row(account, parsed, None, EmailStatus::Filtered)
                .await?;
        }
        Ok(Some(verdict.category))
    }

    async fn persist_email_row(
        &self,
        account: &EmailAccount,
        parsed: &ParsedEmail,
        ticket_id: Option<TicketId>,
        status: EmailStatus,
    ) -> vdesk_common::Result<()> {
        let now = self.clock.now();
        let inserted = self
            .store
            .insert_email(&EmailMessage {
                id: EmailMessageId::new(),
                ticket_id,
                email_account_id: account.id,
                message_id: parsed.message_id.clone(),
                in_reply_to: parsed.in_reply_to.clone(),
                subject: parsed.subject.clone(),
                body_text: parsed.body_text.clone(),
                body_html: parsed.body_html.clone(),
                from: parsed.from.clone(),
                to: parsed.to.clone(),
                cc: parsed.cc.clone(),
                bcc: parsed.bcc.clone(),
                status,
                direction: EmailDirection::Inbound,
                has_attachments: !parsed.attachments.is_empty(),
                error_message: None,
                created_at: now,
                sent_at: None,
                received_at: parsed.date.or(Some(now)),
            })
            .await?;
        if !inserted {
            // lost a crash-replay race; the unique key absorbed it.
            tracing::debug!("Email row already present, insert absorbed.");
        }
        Ok(())
    }

    /// Attachment uploads are best effort: a broken part is logged and
    /// skipped, the message itself already threads.
    async fn upload_attachments(&self, ticket_id: TicketId, parsed: &ParsedEmail) {
        let Some(attachments) = &self.attachments else {
            if !parsed.attachments.is_empty() {
                tracing::warn!("Attachments present but no blob store configured, dropped.");
            }
            return;
        };

        for part in &parsed.attachments {
            let upload = attachments
                .upload(
                    ticket_id,
                    None,
                    &part.file_name,
                    &part.mime_type,
                    &Requester::System,
                    part.data.as_slice(),
                )
                .await;
            if let Err(error) = upload {
                tracing::warn!(file = %part.file_name, %error, "Attachment rejected.");
                self.metrics.incr("ingest.attachment.rejected");
            }
        }
    }
}
