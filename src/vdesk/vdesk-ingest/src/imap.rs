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

//! The IMAP seam. Workers talk to a [`Mailbox`] trait so the poll loop is
//! testable without a server; the real implementation rides async-imap
//! over TLS with the tokio compat shim.

use futures_util::StreamExt;
use vdesk_common::entity::EmailAccount;

/// IMAP failure classes the worker reacts to.
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    /// connection, TLS or protocol trouble; backed off and retried.
    #[error("imap transient failure: {0}")]
    Transient(String),
    /// the server rejected the credentials; retrying cannot help.
    #[error("imap authentication failed: {0}")]
    Auth(String),
    /// the account has no IMAP endpoint and none could be derived.
    #[error("no imap endpoint configured")]
    NoEndpoint,
}

/// One fetched, still-unseen message.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    ///
    pub uid: u32,
    /// raw RFC 5322 bytes.
    pub raw: Vec<u8>,
}

/// A selected INBOX on a live session.
#[async_trait::async_trait]
pub trait Mailbox: Send {
    /// UNSEEN messages with a UID above the cursor, ascending.
    async fn fetch_unseen(&mut self, above_uid: u32) -> Result<Vec<FetchedMessage>, ImapError>;

    /// Flag one message seen on the server.
    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError>;

    /// Say goodbye; errors are ignored, the socket dies either way.
    async fn logout(&mut self);
}

/// Dials accounts into mailboxes.
#[async_trait::async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect, authenticate and select INBOX.
    async fn connect(
        &self,
        account: &EmailAccount,
        password: &str,
    ) -> Result<Box<dyn Mailbox>, ImapError>;
}

/// The production connector: TCP, TLS, LOGIN, SELECT INBOX.
pub struct ImapConnector {
    timeout: std::time::Duration,
}

impl ImapConnector {
    ///
    #[must_use]
    pub const fn new(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }
}

type TlsSession = async_imap::Session<async_native_tls::TlsStream<tokio::net::TcpStream>>;

struct ImapMailbox {
    session: TlsSession,
    timeout: std::time::Duration,
}

async fn with_timeout<T, F>(
    duration: std::time::Duration,
    what: &str,
    future: F,
) -> Result<T, ImapError>
where
    F: std::future::Future<Output = Result<T, ImapError>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ImapError::Transient(format!("{what} timed out")))?
}

#[async_trait::async_trait]
impl MailboxConnector for ImapConnector {
    #[tracing::instrument(skip_all, fields(account = %account.address))]
    async fn connect(
        &self,
        account: &EmailAccount,
        password: &str,
    ) -> Result<Box<dyn Mailbox>, ImapError> {
        let (host, port) = account.imap_endpoint().ok_or(ImapError::NoEndpoint)?;

        let session = with_timeout(self.timeout, "imap connect", async {
            let tcp = tokio::net::TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|error| ImapError::Transient(format!("tcp: {error}")))?;

            let tls = async_native_tls::TlsConnector::new()
                .connect(&host, tcp)
                .await
                .map_err(|error| ImapError::Transient(format!("tls: {error}")))?;

            let client = async_imap::Client::new(tls);
            let mut session = client
                .login(account.address.full(), password)
                .await
                .map_err(|(error, _)| ImapError::Auth(format!("{error:?}")))?;

            session
                .select("INBOX")
                .await
                .map_err(|error| ImapError::Transient(format!("select: {error:?}")))?;
            Ok(session)
        })
        .await?;

        tracing::debug!(%host, port, "IMAP session established.");
        Ok(Box::new(ImapMailbox {
            session,
            timeout: self.timeout,
        }))
    }
}

#[async_trait::async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_unseen(&mut self, above_uid: u32) -> Result<Vec<FetchedMessage>, ImapError> {
        let query = format!("UNSEEN UID {}:*", above_uid.saturating_add(1));
        let uids = with_timeout(self.timeout, "imap search", async {
            self.session
                .uid_search(&query)
                .await
                .map_err(|error| ImapError::Transient(format!("search: {error:?}")))
        })
        .await?;

        let mut uids = uids
            .into_iter()
            .filter(|&uid| uid > above_uid)
            .collect::<Vec<_>>();
        uids.sort_unstable();
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let sequence = uids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut messages = Vec::with_capacity(uids.len());
        {
            let mut fetches = self
                .session
                .uid_fetch(&sequence, "(UID BODY.PEEK[])")
                .await
                .map_err(|error| ImapError::Transient(format!("fetch: {error:?}")))?;

            while let Some(next) = fetches.next().await {
                let fetch =
                    next.map_err(|error| ImapError::Transient(format!("fetch: {error:?}")))?;
                let Some(uid) = fetch.uid else { continue };
                let Some(body) = fetch.body() else {
                    tracing::warn!(uid, "Fetch returned no body, skipping.");
                    continue;
                };
                messages.push(FetchedMessage {
                    uid,
                    raw: body.to_vec(),
                });
            }
        }

        // the server may answer out of order; processing is by UID.
        messages.sort_unstable_by_key(|message| message.uid);
        Ok(messages)
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        let mut responses = self
            .session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await
            .map_err(|error| ImapError::Transient(format!("store: {error:?}")))?;
        while let Some(next) = responses.next().await {
            next.map_err(|error| ImapError::Transient(format!("store: {error:?}")))?;
        }
        Ok(())
    }

    async fn logout(&mut self) {
        let _quietly = self.session.logout().await;
    }
}
