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
use lettre::AsyncTransport;

/// implicit-TLS submission port; everything else starts in clear and
/// upgrades with STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Direct SMTP submission through the account's own server. One connection
/// per send; the dispatcher's per-account pool bounds concurrency.
pub struct Smtp {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: std::time::Duration,
}

impl Smtp {
    ///
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            timeout,
        }
    }

    fn transport(
        &self,
    ) -> Result<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>, SendError> {
        let builder = if self.port == SMTPS_PORT {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(&self.host)
        } else {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.host)
        }
        .map_err(|error| SendError::Permanent(format!("smtp transport setup: {error}")))?;

        Ok(builder
            .port(self.port)
            .credentials(lettre::transport::smtp::authentication::Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build())
    }
}

fn classify(error: &lettre::transport::smtp::Error) -> SendError {
    // 4xx replies and connection trouble are worth retrying, 5xx and
    // authentication failures are not.
    if error.is_transient() || error.is_timeout() {
        SendError::Transient(error.to_string())
    } else if error.is_permanent() || error.is_client() {
        SendError::Permanent(error.to_string())
    } else {
        // network-level errors surface as neither transient nor permanent.
        SendError::Transient(error.to_string())
    }
}

#[async_trait::async_trait]
impl Provider for Smtp {
    #[tracing::instrument(name = "smtp-send", skip_all, fields(host = %self.host, port = self.port))]
    async fn send(&self, envelope: &Envelope) -> Result<Receipt, SendError> {
        let message = envelope.to_lettre()?;
        self.transport()?
            .send(message)
            .await
            .map_err(|error| classify(&error))?;

        tracing::debug!("Submission accepted.");
        Ok(Receipt::default())
    }

    async fn test_connection(&self) -> Result<(), SendError> {
        let alive = self
            .transport()?
            .test_connection()
            .await
            .map_err(|error| classify(&error))?;
        if alive {
            Ok(())
        } else {
            Err(SendError::Transient("smtp server did not answer".to_owned()))
        }
    }
}
