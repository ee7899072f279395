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

use vdesk_common::entity::EmailMessage;

/// Mint a fresh RFC 2822 message id under the sender's domain.
#[must_use]
pub fn generate_message_id(sender_domain: &str) -> String {
    format!("{}@{sender_domain}", uuid::Uuid::new_v4())
}

/// Threading headers of one outbound email, derived from the ticket's email
/// history so the customer's client folds the reply into the right thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadingHeaders {
    /// id of the newest inbound email of the ticket, if any.
    pub in_reply_to: Option<String>,
    /// ancestor chain, oldest first.
    pub references: Vec<String>,
}

impl ThreadingHeaders {
    /// Compute the headers from the ticket's stored email rows.
    ///
    /// `latest_inbound` is what we answer, so it becomes `In-Reply-To`;
    /// `first` is the conversation origin and anchors `References`.
    #[must_use]
    pub fn derive(
        first: Option<&EmailMessage>,
        latest_inbound: Option<&EmailMessage>,
    ) -> Self {
        let in_reply_to = latest_inbound.map(|email| email.message_id.clone());

        let mut references = Vec::new();
        if let Some(first) = first {
            references.push(first.message_id.clone());
        }
        if let Some(reply_to) = &in_reply_to {
            if !references.contains(reply_to) {
                references.push(reply_to.clone());
            }
        }

        Self {
            in_reply_to,
            references,
        }
    }

    /// Render the `References` header value, bracketed, space separated.
    #[must_use]
    pub fn references_header(&self) -> Option<String> {
        if self.references.is_empty() {
            return None;
        }
        Some(
            self.references
                .iter()
                .map(|id| format!("<{id}>"))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    /// Render the `In-Reply-To` header value.
    #[must_use]
    pub fn in_reply_to_header(&self) -> Option<String> {
        self.in_reply_to.as_ref().map(|id| format!("<{id}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vdesk_common::{
        addr,
        entity::{EmailDirection, EmailStatus},
        types::{AccountId, EmailMessageId},
    };

    fn email(message_id: &str) -> EmailMessage {
        EmailMessage {
            id: EmailMessageId::new(),
            ticket_id: None,
            email_account_id: AccountId::new(),
            message_id: message_id.to_owned(),
            in_reply_to: None,
            subject: "s".to_owned(),
            body_text: None,
            body_html: None,
            from: addr!("a@b.test"),
            to: vec![],
            cc: vec![],
            bcc: vec![],
            status: EmailStatus::Received,
            direction: EmailDirection::Inbound,
            has_attachments: false,
            error_message: None,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            sent_at: None,
            received_at: None,
        }
    }

    #[test]
    fn fresh_thread_has_no_headers() {
        let headers = ThreadingHeaders::derive(None, None);
        assert_eq!(headers.in_reply_to_header(), None);
        assert_eq!(headers.references_header(), None);
    }

    #[test]
    fn reply_references_origin_and_latest() {
        let first = email("origin@x");
        let latest = email("latest@x");
        let headers = ThreadingHeaders::derive(Some(&first), Some(&latest));
        assert_eq!(headers.in_reply_to_header().unwrap(), "<latest@x>");
        assert_eq!(
            headers.references_header().unwrap(),
            "<origin@x> <latest@x>"
        );
    }

    #[test]
    fn single_email_thread_does_not_duplicate_references() {
        let only = email("origin@x");
        let headers = ThreadingHeaders::derive(Some(&only), Some(&only));
        assert_eq!(headers.references_header().unwrap(), "<origin@x>");
    }

    #[test]
    fn generated_ids_carry_the_domain() {
        let id = generate_message_id("acme.test");
        assert!(id.ends_with("@acme.test"));
        assert_ne!(id, generate_message_id("acme.test"));
    }
}
