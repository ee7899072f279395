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
    backoff_delay,
    provider::{Mailgun, Provider, Receipt, SendGrid, Ses, Smtp},
    Envelope, SendError,
};
use std::collections::HashMap;
use vdesk_common::{
    entity::{EmailAccount, EmailDirection, EmailMessage, EmailStatus, ProviderKind, Ticket},
    types::{AccountId, Address, EmailMessageId, TemplateId, TicketId},
    Clock, Error, RandomSource, Store,
};
use vdesk_config::field::FieldDelivery;
use vdesk_mail::{generate_message_id, render, TemplateVars, ThreadingHeaders};
use vdesk_seal::MasterKey;

/// What an admin asks the dispatcher to send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    ///
    pub to: Vec<Address>,
    ///
    pub cc: Vec<Address>,
    ///
    pub bcc: Vec<Address>,
    ///
    pub subject: String,
    ///
    pub body_text: String,
    ///
    pub body_html: Option<String>,
    ///
    pub reply_to: Option<Address>,
    /// substitute subject and body from this template.
    pub template_id: Option<TemplateId>,
    /// fills the `{{admin_name}}` template variable.
    pub admin_name: Option<String>,
}

/// Builds the wire for an account. A seam so tests can inject a scripted
/// provider instead of a network client.
pub trait ProviderFactory: Send + Sync {
    /// Construct the provider matching the account's configuration,
    /// unsealing credentials with the master key.
    ///
    /// # Errors
    ///
    /// * [`SendError::Permanent`] on unusable account configuration
    fn build(
        &self,
        account: &EmailAccount,
        master: &MasterKey,
        settings: &FieldDelivery,
    ) -> Result<Box<dyn Provider>, SendError>;
}

/// The real factory: `ProviderKind` → wire.
pub struct StandardProviderFactory;

impl StandardProviderFactory {
    fn unseal(
        master: &MasterKey,
        blob: Option<&vdesk_common::entity::SealedBlob>,
        what: &str,
    ) -> Result<String, SendError> {
        let blob =
            blob.ok_or_else(|| SendError::Permanent(format!("account has no {what}")))?;
        vdesk_seal::open(master, blob)
            .map(|plain| plain.as_str().to_owned())
            .map_err(|error| SendError::Permanent(format!("cannot unseal {what}: {error}")))
    }
}

impl ProviderFactory for StandardProviderFactory {
    fn build(
        &self,
        account: &EmailAccount,
        master: &MasterKey,
        settings: &FieldDelivery,
    ) -> Result<Box<dyn Provider>, SendError> {
        match account.provider {
            ProviderKind::Smtp => {
                let host = account.smtp_host.clone().ok_or_else(|| {
                    SendError::Permanent("smtp account has no smtp_host".to_owned())
                })?;
                let password =
                    Self::unseal(master, account.sealed_password.as_ref(), "password")?;
                Ok(Box::new(Smtp::new(
                    host,
                    account.smtp_port.unwrap_or(587),
                    account.address.full(),
                    password,
                    settings.smtp_timeout,
                )))
            }
            ProviderKind::Sendgrid => {
                let api_key =
                    Self::unseal(master, account.sealed_api_key.as_ref(), "api key")?;
                Ok(Box::new(SendGrid::new(api_key, settings.http_timeout)))
            }
            ProviderKind::Ses => {
                let pair = Self::unseal(master, account.sealed_api_key.as_ref(), "api key")?;
                let (access_key_id, secret) = Ses::split_key(&pair)?;
                let region = account.smtp_host.clone().ok_or_else(|| {
                    SendError::Permanent("ses account stores its region in smtp_host".to_owned())
                })?;
                Ok(Box::new(Ses::new(region, access_key_id, secret)))
            }
            ProviderKind::Mailgun => {
                let api_key =
                    Self::unseal(master, account.sealed_api_key.as_ref(), "api key")?;
                Ok(Box::new(Mailgun::new(
                    api_key,
                    account.address.domain().to_owned(),
                    settings.http_timeout,
                )))
            }
            ProviderKind::Other => Err(SendError::Permanent(
                "provider 'other' is delivered outside the dispatcher".to_owned(),
            )),
        }
    }
}

/// The outbound dispatcher.
pub struct Dispatcher<S> {
    store: std::sync::Arc<S>,
    clock: std::sync::Arc<dyn Clock>,
    random: std::sync::Arc<dyn RandomSource>,
    master: MasterKey,
    settings: FieldDelivery,
    factory: Box<dyn ProviderFactory>,
    pools: std::sync::Mutex<HashMap<AccountId, std::sync::Arc<tokio::sync::Semaphore>>>,
}

impl<S: Store> Dispatcher<S> {
    ///
    pub fn new(
        store: std::sync::Arc<S>,
        clock: std::sync::Arc<dyn Clock>,
        random: std::sync::Arc<dyn RandomSource>,
        master: MasterKey,
        settings: FieldDelivery,
        factory: Box<dyn ProviderFactory>,
    ) -> Self {
        Self {
            store,
            clock,
            random,
            master,
            settings,
            factory,
            pools: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Send an email tied to a ticket and persist the outcome row.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] on unknown ticket/account/template
    /// * [`Error::Validation`] when no sender account is usable
    /// * [`Error::Transient`]/[`Error::Permanent`] on delivery failure (the
    ///   failed row is stored first)
    #[tracing::instrument(skip(self, request), fields(ticket = %ticket_id))]
    pub async fn send_from_ticket(
        &self,
        ticket_id: TicketId,
        request: SendRequest,
        sender_account_id: Option<AccountId>,
    ) -> vdesk_common::Result<EmailMessage> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", ticket_id))?;
        if ticket.is_deleted {
            return Err(Error::InvalidTransition(
                "cannot send from a trashed ticket".to_owned(),
            ));
        }

        let account = self.select_account(&ticket, sender_account_id).await?;
        let (subject, body_text, body_html) = self.render_content(&ticket, &request).await?;

        let threading = ThreadingHeaders::derive(
            self.store.first_email(ticket_id).await?.as_ref(),
            self.store.latest_inbound_email(ticket_id).await?.as_ref(),
        );

        let envelope = Envelope {
            from: account.address.clone(),
            from_name: account.display_name.clone(),
            to: request.to.clone(),
            cc: request.cc.clone(),
            bcc: request.bcc.clone(),
            reply_to: request.reply_to.clone(),
            subject: subject.clone(),
            body_text,
            body_html,
            message_id: generate_message_id(account.address.domain()),
            threading: threading.clone(),
        };

        let mut row = EmailMessage {
            id: EmailMessageId::new(),
            ticket_id: Some(ticket_id),
            email_account_id: account.id,
            message_id: envelope.message_id.clone(),
            in_reply_to: threading.in_reply_to,
            subject,
            body_text: Some(envelope.body_text.clone()),
            body_html: envelope.body_html.clone(),
            from: account.address.clone(),
            to: request.to,
            cc: request.cc,
            bcc: request.bcc,
            status: EmailStatus::Pending,
            direction: EmailDirection::Outbound,
            has_attachments: false,
            error_message: None,
            created_at: self.clock.now(),
            sent_at: None,
            received_at: None,
        };
        self.store.insert_email(&row).await?;

        let provider = match self.factory.build(&account, &self.master, &self.settings) {
            Ok(provider) => provider,
            Err(error) => {
                row.status = EmailStatus::Failed;
                row.error_message = Some(error.to_string());
                self.store.update_email(&row).await?;
                return Err(map_send_error(error));
            }
        };

        // per-account pool; unrelated accounts send in parallel.
        let _permit = self
            .pool(account.id)
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        match self.send_with_retry(provider.as_ref(), &envelope).await {
            Ok(receipt) => {
                row.status = EmailStatus::Sent;
                row.sent_at = Some(self.clock.now());
                if let Some(provider_id) = &receipt.provider_message_id {
                    tracing::debug!(%provider_id, "Provider acknowledged send.");
                }
                self.store.update_email(&row).await?;
                Ok(row)
            }
            Err(error) => {
                row.status = EmailStatus::Failed;
                row.error_message = Some(error.to_string());
                self.store.update_email(&row).await?;
                Err(match error {
                    SendError::Transient(reason) => Error::Transient(reason),
                    SendError::Permanent(reason) => Error::Permanent(reason),
                })
            }
        }
    }

    /// Probe an account's wire without sending, for the admin CRUD.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] on unknown account
    /// * [`Error::Transient`]/[`Error::Permanent`] from the probe
    pub async fn test_account(&self, account_id: AccountId) -> vdesk_common::Result<()> {
        let account = self
            .store
            .email_account(account_id)
            .await?
            .ok_or_else(|| Error::not_found("email_account", account_id))?;
        let provider = self
            .factory
            .build(&account, &self.master, &self.settings)
            .map_err(map_send_error)?;
        provider.test_connection().await.map_err(map_send_error)
    }

    async fn send_with_retry(
        &self,
        provider: &dyn Provider,
        envelope: &Envelope,
    ) -> Result<Receipt, SendError> {
        let mut attempt = 0_u32;
        loop {
            match provider.send(envelope).await {
                Ok(receipt) => return Ok(receipt),
                Err(error) if error.is_transient() && attempt < 2 => {
                    let delay = backoff_delay(attempt, self.random.as_ref());
                    tracing::warn!(%error, attempt, ?delay, "Transient send failure, backing off.");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Selection order: explicit account, the organization's active
    /// default, any active account, else refuse.
    async fn select_account(
        &self,
        ticket: &Ticket,
        explicit: Option<AccountId>,
    ) -> vdesk_common::Result<EmailAccount> {
        if let Some(id) = explicit {
            return self
                .store
                .email_account(id)
                .await?
                .filter(|account| account.is_active)
                .ok_or_else(|| Error::not_found("email_account", id));
        }

        let candidates = self.store.active_accounts(ticket.organization_id).await?;
        candidates
            .iter()
            .find(|account| account.is_default)
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| Error::Validation("no sender account configured".to_owned()))
    }

    async fn render_content(
        &self,
        ticket: &Ticket,
        request: &SendRequest,
    ) -> vdesk_common::Result<(String, String, Option<String>)> {
        let Some(template_id) = request.template_id else {
            return Ok((
                request.subject.clone(),
                request.body_text.clone(),
                request.body_html.clone(),
            ));
        };

        let template = self
            .store
            .template(template_id)
            .await?
            .ok_or_else(|| Error::not_found("template", template_id))?;

        let customer_email = match ticket.user_id {
            Some(user_id) => self
                .store
                .user_address(user_id)
                .await?
                .map(|address| address.full().to_owned())
                .unwrap_or_default(),
            None => String::new(),
        };
        let customer_name = customer_email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_owned();

        let vars = TemplateVars {
            ticket_id: ticket.id.to_string(),
            customer_name,
            customer_email,
            subject: ticket.subject.clone(),
            message: request.body_text.clone(),
            admin_name: request.admin_name.clone().unwrap_or_default(),
        };

        Ok((
            render(&template.subject, &vars),
            render(&template.body_text, &vars),
            template.body_html.as_deref().map(|html| render(html, &vars)),
        ))
    }

    fn pool(&self, account_id: AccountId) -> std::sync::Arc<tokio::sync::Semaphore> {
        #[allow(clippy::expect_used)]
        let mut pools = self.pools.lock().expect("send pool map poisoned");
        pools
            .entry(account_id)
            .or_insert_with(|| {
                std::sync::Arc::new(tokio::sync::Semaphore::new(
                    self.settings.max_concurrent_sends,
                ))
            })
            .clone()
    }
}

fn map_send_error(error: SendError) -> Error {
    match error {
        SendError::Transient(reason) => Error::Transient(reason),
        SendError::Permanent(reason) => Error::Permanent(reason),
    }
}
