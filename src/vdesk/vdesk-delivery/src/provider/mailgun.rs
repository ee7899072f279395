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

const DEFAULT_ENDPOINT: &str = "https://api.mailgun.net";

/// Mailgun `messages.mime`: the envelope is rendered once by lettre and
/// shipped verbatim, so threading headers survive unchanged.
pub struct Mailgun {
    api_key: String,
    domain: String,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct MailgunResponse {
    id: Option<String>,
}

impl Mailgun {
    ///
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        domain: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            domain: domain.into(),
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
}

fn classify_status(status: reqwest::StatusCode, body: String) -> SendError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SendError::Transient(format!("mailgun {status}: {body}"))
    } else {
        SendError::Permanent(format!("mailgun {status}: {body}"))
    }
}

#[async_trait::async_trait]
impl Provider for Mailgun {
    #[tracing::instrument(name = "mailgun-send", skip_all, fields(domain = %self.domain))]
    async fn send(&self, envelope: &Envelope) -> Result<Receipt, SendError> {
        let recipients = envelope
            .to
            .iter()
            .chain(&envelope.cc)
            .chain(&envelope.bcc)
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let form = reqwest::multipart::Form::new()
            .text("to", recipients)
            .part(
                "message",
                reqwest::multipart::Part::bytes(envelope.to_mime()?)
                    .file_name("message.mime"),
            );

        let response = self
            .client
            .post(format!(
                "{}/v3/{}/messages.mime",
                self.endpoint, self.domain
            ))
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|error| SendError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed = response.json::<MailgunResponse>().await.ok();
        Ok(Receipt {
            provider_message_id: parsed.and_then(|body| body.id),
        })
    }

    async fn test_connection(&self) -> Result<(), SendError> {
        let response = self
            .client
            .get(format!("{}/v3/domains/{}", self.endpoint, self.domain))
            .basic_auth("api", Some(&self.api_key))
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
