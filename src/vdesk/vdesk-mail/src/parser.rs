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

use mail_parser::MimeHeaders;
use vdesk_common::types::Address;

/// The message could not be turned into a [`ParsedEmail`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// not a MIME message at all.
    #[error("unparseable mime payload")]
    Unparseable,
    /// a message without a usable `From` cannot be threaded or answered.
    #[error("missing or invalid From header")]
    MissingFrom,
}

/// One decoded attachment part.
pub struct ParsedAttachment {
    ///
    pub file_name: String,
    ///
    pub mime_type: String,
    ///
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ParsedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedAttachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Everything the ingestion pipeline needs from one inbound email.
#[derive(Debug)]
pub struct ParsedEmail {
    /// normalized RFC 2822 message id (angle brackets stripped).
    pub message_id: String,
    /// normalized id of the message this one replies to.
    pub in_reply_to: Option<String>,
    ///
    pub subject: String,
    ///
    pub from: Address,
    ///
    pub to: Vec<Address>,
    ///
    pub cc: Vec<Address>,
    ///
    pub bcc: Vec<Address>,
    ///
    pub body_text: Option<String>,
    ///
    pub body_html: Option<String>,
    /// `List-Unsubscribe` presence, a strong promotion signal.
    pub has_list_unsubscribe: bool,
    /// `Date` header when present.
    pub date: Option<time::OffsetDateTime>,
    ///
    pub attachments: Vec<ParsedAttachment>,
}

/// Strip the RFC 2822 angle brackets so ids compare equal regardless of the
/// producer's quoting habits.
#[must_use]
pub(crate) fn normalize_msgid(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_owned()
}

fn collect_addresses(list: Option<&mail_parser::Address<'_>>) -> Vec<Address> {
    list.into_iter()
        .flat_map(mail_parser::Address::iter)
        .filter_map(|addr| addr.address.as_ref())
        .filter_map(|raw| raw.parse::<Address>().ok())
        .collect()
}

impl ParsedEmail {
    /// Decode a raw RFC 5322 payload.
    ///
    /// # Errors
    ///
    /// * [`ParseError::Unparseable`] on non-MIME garbage
    /// * [`ParseError::MissingFrom`] when no sender can be extracted
    pub fn from_rfc5322(raw: &[u8]) -> Result<Self, ParseError> {
        let message = mail_parser::MessageParser::default()
            .parse(raw)
            .ok_or(ParseError::Unparseable)?;

        let from = message
            .from()
            .into_iter()
            .flat_map(mail_parser::Address::iter)
            .filter_map(|addr| addr.address.as_ref())
            .find_map(|raw| raw.parse::<Address>().ok())
            .ok_or(ParseError::MissingFrom)?;

        // a missing Message-ID gets a synthetic one; dedup still works
        // because re-fetching the same UID re-parses the same bytes only
        // within one poll pass, and later passes skip seen UIDs.
        let message_id = message.message_id().map_or_else(
            || format!("vdesk-generated-{}", uuid::Uuid::new_v4()),
            normalize_msgid,
        );

        // `In-Reply-To` may carry several ids; the last one is the direct
        // parent.
        let in_reply_to = match message.in_reply_to() {
            mail_parser::HeaderValue::Text(text) => Some(normalize_msgid(text)),
            mail_parser::HeaderValue::TextList(list) => {
                list.last().map(|text| normalize_msgid(text))
            }
            _ => None,
        }
        .filter(|id| !id.is_empty());

        let date = message
            .date()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.to_timestamp()).ok());

        let mut attachments = Vec::new();
        for part in message.attachments() {
            let mime_type = part.content_type().map_or_else(
                || "application/octet-stream".to_owned(),
                |ct| match &ct.c_subtype {
                    Some(subtype) => format!("{}/{subtype}", ct.c_type),
                    None => ct.c_type.to_string(),
                },
            );
            attachments.push(ParsedAttachment {
                file_name: part
                    .attachment_name()
                    .unwrap_or("attachment")
                    .to_owned(),
                mime_type,
                data: part.contents().to_vec(),
            });
        }

        Ok(Self {
            message_id,
            in_reply_to,
            subject: message.subject().unwrap_or("(no subject)").to_owned(),
            from,
            to: collect_addresses(message.to()),
            cc: collect_addresses(message.cc()),
            bcc: collect_addresses(message.bcc()),
            body_text: message.body_text(0).map(|text| text.to_string()),
            body_html: message.body_html(0).map(|html| html.to_string()),
            has_list_unsubscribe: message.header("List-Unsubscribe").is_some(),
            date,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SIMPLE: &str = "From: Ada <ada@customer.test>\r\n\
        To: support@acme.test\r\n\
        Subject: Password reset\r\n\
        Message-ID: <m-1@customer.test>\r\n\
        In-Reply-To: <m-0@acme.test>\r\n\
        Date: Tue, 7 Mar 2023 10:00:00 +0000\r\n\
        \r\n\
        Hi, I cannot log in.\r\n";

    #[test]
    fn extracts_the_interesting_headers() {
        let parsed = ParsedEmail::from_rfc5322(SIMPLE.as_bytes()).unwrap();
        assert_eq!(parsed.message_id, "m-1@customer.test");
        assert_eq!(parsed.in_reply_to.as_deref(), Some("m-0@acme.test"));
        assert_eq!(parsed.subject, "Password reset");
        assert_eq!(parsed.from.full(), "ada@customer.test");
        assert_eq!(parsed.to.len(), 1);
        assert!(parsed.body_text.unwrap().contains("cannot log in"));
        assert!(!parsed.has_list_unsubscribe);
    }

    #[test]
    fn msgid_normalization_strips_brackets() {
        assert_eq!(normalize_msgid(" <abc@x> "), "abc@x");
        assert_eq!(normalize_msgid("abc@x"), "abc@x");
    }

    #[test]
    fn list_unsubscribe_is_detected() {
        let raw = "From: news@shop.test\r\n\
            Subject: SALE\r\n\
            List-Unsubscribe: <mailto:stop@shop.test>\r\n\
            \r\n\
            Buy now\r\n";
        let parsed = ParsedEmail::from_rfc5322(raw.as_bytes()).unwrap();
        assert!(parsed.has_list_unsubscribe);
    }

    #[test]
    fn message_without_from_is_refused() {
        let raw = "Subject: hello\r\n\r\nbody\r\n";
        assert!(matches!(
            ParsedEmail::from_rfc5322(raw.as_bytes()),
            Err(ParseError::MissingFrom)
        ));
    }

    #[test]
    fn missing_message_id_gets_a_synthetic_one() {
        let raw = "From: a@b.test\r\nSubject: x\r\n\r\nbody\r\n";
        let parsed = ParsedEmail::from_rfc5322(raw.as_bytes()).unwrap();
        assert!(parsed.message_id.starts_with("vdesk-generated-"));
    }
}
