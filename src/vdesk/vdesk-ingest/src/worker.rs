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
    cursor::PollerCursor,
    imap::{ImapError, MailboxConnector},
    pipeline::IngestPipeline,
};
use std::collections::HashMap;
use vdesk_common::{types::AccountId, Clock, Metrics, Store};
use vdesk_config::field::FieldPolling;
use vdesk_mail::ParsedEmail;
use vdesk_seal::MasterKey;

/// Caps concurrent IMAP connections per remote host so one deployment does
/// not trip provider throttling.
pub struct HostLimiter {
    per_host: usize,
    hosts: std::sync::Mutex<HashMap<String, std::sync::Arc<tokio::sync::Semaphore>>>,
}

impl HostLimiter {
    ///
    #[must_use]
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host,
            hosts: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a connection slot to `host`.
    pub async fn acquire(&self, host: &str) -> tokio::sync::OwnedSemaphorePermit {
        let semaphore = {
            #[allow(clippy::expect_used)]
            let mut hosts = self.hosts.lock().expect("host limiter poisoned");
            hosts
                .entry(host.to_owned())
                .or_insert_with(|| {
                    std::sync::Arc::new(tokio::sync::Semaphore::new(self.per_host))
                })
                .clone()
        };
        #[allow(clippy::expect_used)]
        semaphore
            .acquire_owned()
            .await
            .expect("host limiter semaphore closed")
    }
}

enum PassEnd {
    /// normal pass, poll again after the regular interval.
    Polled,
    /// the account vanished or stopped wanting polling.
    Retire,
}

/// One long-running poll loop for one account. Spawned and cancelled by
/// the supervisor as the account table changes.
pub struct AccountWorker<S> {
    account_id: AccountId,
    store: std::sync::Arc<S>,
    pipeline: std::sync::Arc<IngestPipeline<S>>,
    connector: std::sync::Arc<dyn MailboxConnector>,
    master: MasterKey,
    limiter: std::sync::Arc<HostLimiter>,
    settings: FieldPolling,
    clock: std::sync::Arc<dyn Clock>,
    metrics: std::sync::Arc<dyn Metrics>,
    cursor: PollerCursor,
    shutdown: tokio::sync::watch::Receiver<bool>,
}

impl<S: Store> AccountWorker<S> {
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        store: std::sync::Arc<S>,
        pipeline: std::sync::Arc<IngestPipeline<S>>,
        connector: std::sync::Arc<dyn MailboxConnector>,
        master: MasterKey,
        limiter: std::sync::Arc<HostLimiter>,
        settings: FieldPolling,
        clock: std::sync::Arc<dyn Clock>,
        metrics: std::sync::Arc<dyn Metrics>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            account_id,
            store,
            pipeline,
            connector,
            master,
            limiter,
            settings,
            clock,
            metrics,
            cursor: PollerCursor::default(),
            shutdown,
        }
    }

    /// The poll loop: fetch, process, back off on trouble, disable the
    /// account after too many consecutive failures.
    #[tracing::instrument(name = "poller", skip(self), fields(account = %self.account_id))]
    pub async fn run(mut self) {
        let mut delay = std::time::Duration::ZERO;

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::debug!("Poller stopping on shutdown.");
                        return;
                    }
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.poll_once().await {
                Ok(PassEnd::Polled) => {
                    self.cursor.succeed(self.clock.now());
                    delay = self.settings.interval;
                }
                Ok(PassEnd::Retire) => {
                    tracing::info!("Account no longer polled, worker retiring.");
                    return;
                }
                Err(error) => {
                    delay = self.cursor.fail();
                    self.metrics.incr("poller.pass_failed");
                    tracing::warn!(
                        %error,
                        failures = self.cursor.consecutive_failures,
                        ?delay,
                        "Poll pass failed."
                    );

                    if self.cursor.consecutive_failures
                        >= self.settings.max_consecutive_failures
                    {
                        self.disable_account().await;
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Result<PassEnd, ImapError> {
        let mut account = match self.store.email_account(self.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => return Ok(PassEnd::Retire),
            Err(error) => return Err(ImapError::Transient(format!("store: {error}"))),
        };
        if !account.wants_polling() {
            return Ok(PassEnd::Retire);
        }

        let sealed = account
            .sealed_password
            .clone()
            .ok_or_else(|| ImapError::Auth("account has no sealed password".to_owned()))?;
        let password = vdesk_seal::open(&self.master, &sealed)
            .map_err(|error| ImapError::Auth(error.to_string()))?;

        let (host, _) = account.imap_endpoint().ok_or(ImapError::NoEndpoint)?;
        let _slot = self.limiter.acquire(&host).await;

        let mut mailbox = self.connector.connect(&account, &password).await?;
        let fetched = mailbox.fetch_unseen(self.cursor.last_seen_uid).await?;
        if !fetched.is_empty() {
            tracing::info!(count = fetched.len(), "New inbound messages.");
        }

        for message in fetched {
            match ParsedEmail::from_rfc5322(&message.raw) {
                Ok(parsed) => {
                    if let Err(error) = self.pipeline.process(&account, parsed).await {
                        // a store hiccup on one message must not block the
                        // rest of the mailbox; it re-runs next pass.
                        tracing::error!(uid = message.uid, %error, "Pipeline failure, message left unseen.");
                        self.metrics.incr("poller.pipeline_failed");
                        continue;
                    }
                }
                Err(error) => {
                    tracing::warn!(uid = message.uid, %error, "Unparseable message skipped.");
                    self.metrics.incr("poller.unparseable");
                }
            }

            // seen-flag after the row write; a crash between the two is
            // absorbed by the (account, message_id) uniqueness.
            mailbox.mark_seen(message.uid).await?;
            self.cursor.advance(message.uid);
        }

        mailbox.logout().await;

        account.last_polled_at = Some(self.clock.now());
        if let Err(error) = self.store.update_email_account(&account).await {
            tracing::warn!(%error, "Cannot persist last_polled_at.");
        }
        Ok(PassEnd::Polled)
    }

    /// Five strikes: stop polling this account and tell the operator.
    async fn disable_account(&self) {
        self.metrics.incr("poller.account_disabled");
        tracing::error!(
            account = %self.account_id,
            failures = self.cursor.consecutive_failures,
            "Polling disabled after repeated failures; operator action required."
        );

        match self.store.email_account(self.account_id).await {
            Ok(Some(mut account)) => {
                account.imap_enabled = false;
                if let Err(error) = self.store.update_email_account(&account).await {
                    tracing::error!(%error, "Cannot persist the polling disable flag.");
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(%error, "Cannot load the account to disable it.");
            }
        }
    }
}
