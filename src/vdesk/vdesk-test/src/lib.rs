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

//! Shared fixtures of the vDesk test suites: a fully wired in-memory
//! harness, scripted providers and mailboxes, and entity builders.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod config;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use vdesk_ai::AiCoordinator;
use vdesk_classifier::{Classifier, Thresholds};
use vdesk_common::{
    addr,
    entity::{EmailAccount, ProviderKind, RoutingRule, RuleAction, RuleConditions},
    testing::{FixedRandom, ManualClock, MemoryBlob, MemoryStore, ScriptedGenerator},
    types::{AccountId, RuleId, UserId},
    NoopMetrics,
};
use vdesk_config::Config;
use vdesk_delivery::{Dispatcher, Envelope, ProviderFactory, SendError, SendRequest};
use vdesk_ingest::{FetchedMessage, ImapError, IngestPipeline, Mailbox, MailboxConnector};
use vdesk_mail::{ParsedAttachment, ParsedEmail};
use vdesk_sla::SlaTracker;
use vdesk_ticket::{AttachmentCoordinator, IngestRequest, TicketStateManager, TrashPurger};

/// Everything a scenario needs, wired over the in-memory collaborators.
pub struct Harness {
    pub config: Arc<Config>,
    pub store: Arc<MemoryStore>,
    pub blob: Arc<MemoryBlob>,
    pub clock: Arc<ManualClock>,
    pub generator: Arc<ScriptedGenerator>,
    pub manager: Arc<TicketStateManager<MemoryStore>>,
    pub sla: Arc<SlaTracker<MemoryStore>>,
    pub attachments: Arc<AttachmentCoordinator<MemoryStore>>,
    pub purger: Arc<TrashPurger<MemoryStore>>,
    pub coordinator: Arc<AiCoordinator<MemoryStore>>,
    pub pipeline: Arc<IngestPipeline<MemoryStore>>,
}

/// Build a harness with a canned generator and default config.
#[must_use]
pub fn harness() -> Harness {
    harness_with(config::local_test(), ScriptedGenerator::canned())
}

/// Build a harness with a custom config and generator script.
#[must_use]
pub fn harness_with(config: Config, generator: ScriptedGenerator) -> Harness {
    let config = Arc::new(config);
    let store = Arc::new(MemoryStore::new());
    let blob = Arc::new(MemoryBlob::new());
    let clock = Arc::new(ManualClock::default());
    let generator = Arc::new(generator);
    let metrics = Arc::new(NoopMetrics);

    let manager = Arc::new(TicketStateManager::new(
        store.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let sla = Arc::new(SlaTracker::new(store.clone(), clock.clone()));
    let attachments = Arc::new(AttachmentCoordinator::new(
        store.clone(),
        blob.clone(),
        clock.clone(),
        config.attachments.clone(),
    ));
    let purger = Arc::new(TrashPurger::new(
        store.clone(),
        attachments.clone(),
        clock.clone(),
    ));
    let coordinator = Arc::new(AiCoordinator::new(
        manager.clone(),
        generator.clone(),
        clock.clone(),
        Arc::new(FixedRandom),
        metrics.clone(),
        config.ai.clone(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        manager.clone(),
        Some(attachments.clone()),
        Classifier::new(Thresholds {
            spam: config.filter.spam_threshold,
            promotion: config.filter.promotion_threshold,
        }),
        config.filter.clone(),
        clock.clone(),
        metrics,
        None,
    ));

    Harness {
        config,
        store,
        blob,
        clock,
        generator,
        manager,
        sla,
        attachments,
        purger,
        coordinator,
        pipeline,
    }
}

/// A web-channel ingestion request.
#[must_use]
pub fn web_request(context: &str, subject: &str, body: &str, user: UserId) -> IngestRequest {
    IngestRequest {
        channel: vdesk_common::entity::TicketSource::Web,
        user_id: Some(user),
        organization_id: None,
        context: context.to_owned(),
        subject: subject.to_owned(),
        body: body.to_owned(),
        priority: None,
        ticket_hint: None,
    }
}

/// A polled SMTP account with a sealed password.
#[must_use]
pub fn smtp_account(address: &str, master: &vdesk_seal::MasterKey) -> EmailAccount {
    EmailAccount {
        id: AccountId::new(),
        organization_id: None,
        address: addr!(address),
        display_name: Some("Support".to_owned()),
        provider: ProviderKind::Smtp,
        sealed_password: Some(vdesk_seal::seal(master, "hunter2").unwrap()),
        sealed_api_key: None,
        smtp_host: Some("smtp.acme.test".to_owned()),
        smtp_port: Some(587),
        imap_host: Some("imap.acme.test".to_owned()),
        imap_port: Some(993),
        imap_enabled: true,
        last_polled_at: None,
        is_active: true,
        is_default: true,
        created_at: time::macros::datetime!(2023-03-01 00:00 UTC),
    }
}

/// A keyword routing rule.
#[must_use]
pub fn keyword_rule(name: &str, priority: i32, keyword: &str, action: RuleAction) -> RoutingRule {
    RoutingRule {
        id: RuleId::new(),
        organization_id: None,
        name: name.to_owned(),
        priority,
        is_active: true,
        conditions: RuleConditions {
            keywords: vec![keyword.to_owned()],
            ..RuleConditions::default()
        },
        action,
        created_at: time::macros::datetime!(2023-03-01 00:00 UTC),
    }
}

/// An inbound email the pipeline can consume, bypassing MIME bytes.
#[must_use]
pub fn parsed_email(from: &str, subject: &str, body: &str, message_id: &str) -> ParsedEmail {
    ParsedEmail {
        message_id: message_id.to_owned(),
        in_reply_to: None,
        subject: subject.to_owned(),
        from: addr!(from),
        to: vec![addr!("support@acme.test")],
        cc: vec![],
        bcc: vec![],
        body_text: Some(body.to_owned()),
        body_html: None,
        has_list_unsubscribe: false,
        date: None,
        attachments: vec![],
    }
}

/// Attach a file to a built email.
#[must_use]
pub fn with_attachment(mut email: ParsedEmail, name: &str, mime: &str, data: &[u8]) -> ParsedEmail {
    email.attachments.push(ParsedAttachment {
        file_name: name.to_owned(),
        mime_type: mime.to_owned(),
        data: data.to_vec(),
    });
    email
}

// ---- scripted outbound provider -------------------------------------------

/// Records envelopes and replays scripted failures.
#[derive(Default)]
pub struct FakeProvider {
    pub sent: std::sync::Mutex<Vec<Envelope>>,
    pub failures: std::sync::Mutex<std::collections::VecDeque<SendError>>,
}

impl FakeProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a failure for the next send.
    pub fn fail_next(&self, error: SendError) {
        self.failures.lock().unwrap().push_back(error);
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    #[must_use]
    pub fn last_envelope(&self) -> Option<Envelope> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl vdesk_delivery::provider::Provider for Arc<FakeProvider> {
    async fn send(
        &self,
        envelope: &Envelope,
    ) -> Result<vdesk_delivery::provider::Receipt, SendError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(vdesk_delivery::provider::Receipt {
            provider_message_id: Some(format!("fake-{}", self.sent_count())),
        })
    }

    async fn test_connection(&self) -> Result<(), SendError> {
        Ok(())
    }
}

/// Factory handing out clones of one shared fake provider.
pub struct FakeProviderFactory(pub Arc<FakeProvider>);

impl ProviderFactory for FakeProviderFactory {
    fn build(
        &self,
        _account: &EmailAccount,
        _master: &vdesk_seal::MasterKey,
        _settings: &vdesk_config::field::FieldDelivery,
    ) -> Result<Box<dyn vdesk_delivery::provider::Provider>, SendError> {
        Ok(Box::new(self.0.clone()))
    }
}

/// A dispatcher backed by the fake provider; returns both.
#[must_use]
pub fn fake_dispatcher(harness: &Harness) -> (Arc<Dispatcher<MemoryStore>>, Arc<FakeProvider>) {
    let provider = FakeProvider::new();
    let dispatcher = Arc::new(Dispatcher::new(
        harness.store.clone(),
        harness.clock.clone(),
        Arc::new(FixedRandom),
        master_key(),
        harness.config.delivery.clone(),
        Box::new(FakeProviderFactory(provider.clone())),
    ));
    (dispatcher, provider)
}

/// The master key every test seals credentials with.
#[must_use]
pub fn master_key() -> vdesk_seal::MasterKey {
    vdesk_seal::MasterKey::derive("test-master-key")
}

/// An empty send request towards one recipient.
#[must_use]
pub fn send_request(to: &str, subject: &str, body: &str) -> SendRequest {
    SendRequest {
        to: vec![addr!(to)],
        subject: subject.to_owned(),
        body_text: body.to_owned(),
        ..SendRequest::default()
    }
}

// ---- scripted mailbox ------------------------------------------------------

/// One poll pass worth of scripted messages, shared with the worker.
pub struct FakeMailboxState {
    pub messages: std::sync::Mutex<Vec<FetchedMessage>>,
    pub seen: std::sync::Mutex<Vec<u32>>,
    pub connect_failures: std::sync::Mutex<u32>,
}

impl FakeMailboxState {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: std::sync::Mutex::new(Vec::new()),
            seen: std::sync::Mutex::new(Vec::new()),
            connect_failures: std::sync::Mutex::new(0),
        })
    }

    /// Queue a raw message under a UID.
    pub fn deliver(&self, uid: u32, raw: &str) {
        self.messages.lock().unwrap().push(FetchedMessage {
            uid,
            raw: raw.as_bytes().to_vec(),
        });
    }

    /// Make the next `count` connects fail with a transient error.
    pub fn refuse_connections(&self, count: u32) {
        *self.connect_failures.lock().unwrap() = count;
    }

    #[must_use]
    pub fn seen_uids(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

struct FakeMailbox(Arc<FakeMailboxState>);

#[async_trait::async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_unseen(&mut self, above_uid: u32) -> Result<Vec<FetchedMessage>, ImapError> {
        let seen = self.0.seen.lock().unwrap().clone();
        let mut unseen = self
            .0
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.uid > above_uid && !seen.contains(&message.uid))
            .cloned()
            .collect::<Vec<_>>();
        unseen.sort_unstable_by_key(|message| message.uid);
        Ok(unseen)
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.0.seen.lock().unwrap().push(uid);
        Ok(())
    }

    async fn logout(&mut self) {}
}

/// Connector serving the scripted mailbox.
pub struct FakeConnector(pub Arc<FakeMailboxState>);

#[async_trait::async_trait]
impl MailboxConnector for FakeConnector {
    async fn connect(
        &self,
        _account: &EmailAccount,
        _password: &str,
    ) -> Result<Box<dyn Mailbox>, ImapError> {
        {
            let mut failures = self.0.connect_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ImapError::Transient("connection refused".to_owned()));
            }
        }
        Ok(Box::new(FakeMailbox(self.0.clone())))
    }
}
