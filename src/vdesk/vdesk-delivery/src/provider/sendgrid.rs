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

use super::{Provider, Receipt};
use crate::{Envelope, SendError};
use vdesk_common::types::Address;

const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com";

/// SendGrid v3 mail/send. One HTTPS request per envelope.
pub struct SendGrid {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl SendGrid {
    ///
    #[must_use]
    pub fn new(api_key: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a different host, for tests.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn payload(envelope: &Envelope) -> serde_json::Value {
        fn emails(list: &[Address]) -> Vec<serde_json::Value> {
            list.iter()
                .map(|address| serde_json::json!({ "email": address.full() }))
                .collect()
        }

        let mut personalization = serde_json::json!({ "to": emails(&envelope.to) });
        if !envelope.cc.is_empty() {
            personalization["cc"] = serde_json::Value::Array(emails(&envelope.cc));
        }
        if !envelope.bcc.is_empty() {
            personalization["bcc"] = serde_json::Value::Array(emails(&envelope.bcc));
        }

        let mut content = vec![serde_json::json!({
            "type": "text/plain",
            "value": envelope.body_text,
        })];
        if let Some(html) = &envelope.body_html {
            content.push(serde_json::json!({ "type": "text/html", "value": html }));
        }

        let mut headers = serde_json::Map::new();
        if let Some(in_reply_to) = envelope.threading.in_reply_to_header() {
            headers.insert("In-Reply-To".to_owned(), in_reply_to.into());
        }
        if let Some(references) = envelope.threading.references_header() {
            headers.insert("References".to_owned(), references.into());
        }

        let mut from = serde_json::json!({ "email": envelope.from.full() });
        if let Some(name) = &envelope.from_name {
            from["name"] = serde_json::Value::String(name.clone());
        }

        let mut payload = serde_json::json!({
            "personalizations": [personalization],
            "from": from,
            "subject": envelope.subject,
            "content": content,
        });
        if !headers.is_empty() {
            payload["headers"] = serde_json::Value::Object(headers);
        }
        if let Some(reply_to) = &envelope.reply_to {
            payload["reply_to"] = serde_json::json!({ "email": reply_to.full() });
        }
        payload
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> SendError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SendError::Transient(format!("sendgrid {status}: {body}"))
    } else {
        SendError::Permanent(format!("sendgrid {status}: {body}"))
    }
}

#[async_trait::async_trait]
impl Provider for SendGrid {
    #[tracing::instrument(name = "sendgrid-send", skip_all)]
    async fn send(&self, envelope: &Envelope) -> Result<Receipt, SendError> {
        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&Self::payload(envelope))
            .send()
            .await
            .map_err(|error| SendError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        Ok(Receipt {
            provider_message_id: response
                .headers()
                .get("x-message-id")
                .and_then(|value| value.to_str().ok())
                .map(std::borrow::ToOwned::to_owned),
        })
    }

    async fn test_connection(&self) -> Result<(), SendError> {
        let response = self
            .client
            .get(format!("{}/v3/scopes", self.endpoint))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|error| SendError::Transient(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesk_common::addr;
    use vdesk_mail::ThreadingHeaders;

    fn envelope() -> Envelope {
        Envelope {
            from: addr!("support@acme.test"),
            from_name: None,
            to: vec![addr!("ada@customer.test")],
            cc: vec![],
            bcc: vec![],
            reply_to: None,
            subject: "Hello".to_owned(),
            body_text: "Hi".to_owned(),
            body_html: None,
            message_id: "out@acme.test".to_owned(),
            threading: ThreadingHeaders {
                in_reply_to: Some("m@x".to_owned()),
                references: vec!["m@x".to_owned()],
            },
        }
    }

    #[test]
    fn payload_shape() {
        let payload = SendGrid::payload(&envelope());
        assert_eq!(
            payload["personalizations"][0]["to"][0]["email"],
            "ada@customer.test"
        );
        assert_eq!(payload["headers"]["In-Reply-To"], "<m@x>");
        assert!(payload.get("reply_to").is_none());
        // empty groups are omitted entirely, sendgrid rejects empty arrays.
        assert!(payload["personalizations"][0].get("cc").is_none());
    }

    #[test]
    fn rate_limit_is_transient_auth_is_not() {
        assert!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new())
                .is_transient()
        );
        assert!(!classify_status(reqwest::StatusCode::UNAUTHORIZED, String::new())
            .is_transient());
    }
}
