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

use crate::SendError;
use vdesk_common::types::Address;
use vdesk_mail::ThreadingHeaders;

/// A fully rendered outbound email, ready for any provider.
#[derive(Debug, Clone)]
pub struct Envelope {
    ///
    pub from: Address,
    /// display name of the sender account.
    pub from_name: Option<String>,
    ///
    pub to: Vec<Address>,
    ///
    pub cc: Vec<Address>,
    ///
    pub bcc: Vec<Address>,
    ///
    pub reply_to: Option<Address>,
    ///
    pub subject: String,
    ///
    pub body_text: String,
    ///
    pub body_html: Option<String>,
    /// RFC 2822 id minted for this message, also persisted on the row.
    pub message_id: String,
    ///
    pub threading: ThreadingHeaders,
}

impl Envelope {
    fn lettre_mailbox(address: &Address, name: Option<&str>) -> Result<lettre::message::Mailbox, SendError> {
        let parsed = lettre::Address::new(address.local_part(), address.domain())
            .map_err(|error| SendError::Permanent(format!("invalid address '{address}': {error}")))?;
        Ok(lettre::message::Mailbox::new(
            name.map(std::borrow::ToOwned::to_owned),
            parsed,
        ))
    }

    /// Build the RFC 5322 representation once; SMTP, SES and Mailgun all
    /// transmit these exact bytes, so every wire threads identically.
    ///
    /// # Errors
    ///
    /// * [`SendError::Permanent`] on unbuildable addresses
    pub fn to_lettre(&self) -> Result<lettre::Message, SendError> {
        let mut builder = lettre::Message::builder()
            .from(Self::lettre_mailbox(&self.from, self.from_name.as_deref())?)
            .subject(self.subject.clone())
            .message_id(Some(format!("<{}>", self.message_id)));

        for to in &self.to {
            builder = builder.to(Self::lettre_mailbox(to, None)?);
        }
        for cc in &self.cc {
            builder = builder.cc(Self::lettre_mailbox(cc, None)?);
        }
        for bcc in &self.bcc {
            builder = builder.bcc(Self::lettre_mailbox(bcc, None)?);
        }
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(Self::lettre_mailbox(reply_to, None)?);
        }
        if let Some(in_reply_to) = self.threading.in_reply_to_header() {
            builder = builder.in_reply_to(in_reply_to);
        }
        if let Some(references) = self.threading.references_header() {
            builder = builder.references(references);
        }

        let message = match &self.body_html {
            Some(html) => builder.multipart(
                lettre::message::MultiPart::alternative_plain_html(
                    self.body_text.clone(),
                    html.clone(),
                ),
            ),
            None => builder.body(self.body_text.clone()),
        };
        message.map_err(|error| SendError::Permanent(format!("unbuildable message: {error}")))
    }

    /// The raw MIME bytes of [`Envelope::to_lettre`].
    ///
    /// # Errors
    ///
    /// * [`SendError::Permanent`] on unbuildable addresses
    pub fn to_mime(&self) -> Result<Vec<u8>, SendError> {
        Ok(self.to_lettre()?.formatted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesk_common::addr;

    fn envelope() -> Envelope {
        Envelope {
            from: addr!("support@acme.test"),
            from_name: Some("Acme Support".to_owned()),
            to: vec![addr!("ada@customer.test")],
            cc: vec![],
            bcc: vec![],
            reply_to: None,
            subject: "Re: Password reset".to_owned(),
            body_text: "All sorted.".to_owned(),
            body_html: None,
            message_id: "out-1@acme.test".to_owned(),
            threading: ThreadingHeaders {
                in_reply_to: Some("m-1@customer.test".to_owned()),
                references: vec!["m-0@acme.test".to_owned(), "m-1@customer.test".to_owned()],
            },
        }
    }

    #[test]
    fn mime_carries_the_threading_headers() {
        let mime = String::from_utf8(envelope().to_mime().unwrap()).unwrap();
        assert!(mime.contains("In-Reply-To: <m-1@customer.test>"), "{mime}");
        assert!(
            mime.contains("References: <m-0@acme.test> <m-1@customer.test>"),
            "{mime}"
        );
        assert!(mime.contains("Message-ID: <out-1@acme.test>"), "{mime}");
    }

    #[test]
    fn html_makes_it_multipart() {
        let mut env = envelope();
        env.body_html = Some("<p>All sorted.</p>".to_owned());
        let mime = String::from_utf8(env.to_mime().unwrap()).unwrap();
        assert!(mime.contains("multipart/alternative"), "{mime}");
    }

    #[test]
    fn identical_inputs_render_identical_bodies() {
        // provider retries and re-sends must not mutate content.
        let left = envelope().to_mime().unwrap();
        let right = envelope().to_mime().unwrap();
        // lettre stamps a Date header; strip both before comparing.
        let strip = |raw: &[u8]| {
            String::from_utf8(raw.to_vec())
                .unwrap()
                .lines()
                .filter(|line| !line.starts_with("Date:"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&left), strip(&right));
    }
}
