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
use aws_sdk_ses::error::ProvideErrorMetadata;

/// Amazon SES, raw-message API so the lettre rendering (and its threading
/// headers) goes over the wire unmodified.
///
/// The account's sealed api key is `"<access_key_id>:<secret>"`; the region
/// rides in the account's `smtp_host` field (e.g. `eu-west-1`).
pub struct Ses {
    client: aws_sdk_ses::Client,
}

impl Ses {
    ///
    #[must_use]
    pub fn new(region: impl Into<String>, access_key_id: &str, secret_access_key: &str) -> Self {
        let config = aws_sdk_ses::config::Builder::new()
            .behavior_version(aws_sdk_ses::config::BehaviorVersion::latest())
            .region(aws_sdk_ses::config::Region::new(region.into()))
            .credentials_provider(aws_sdk_ses::config::Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "vdesk-account",
            ))
            .build();
        Self {
            client: aws_sdk_ses::Client::from_conf(config),
        }
    }

    /// Split the sealed `"key:secret"` pair.
    ///
    /// # Errors
    ///
    /// * [`SendError::Permanent`] when the separator is missing
    pub fn split_key(sealed_pair: &str) -> Result<(&str, &str), SendError> {
        sealed_pair.split_once(':').ok_or_else(|| {
            SendError::Permanent("ses api key must be '<access_key_id>:<secret>'".to_owned())
        })
    }
}

fn classify<E: ProvideErrorMetadata + std::fmt::Debug>(
    error: &aws_sdk_ses::error::SdkError<E>,
) -> SendError {
    match error {
        aws_sdk_ses::error::SdkError::DispatchFailure(_)
        | aws_sdk_ses::error::SdkError::TimeoutError(_)
        | aws_sdk_ses::error::SdkError::ResponseError(_) => {
            SendError::Transient(format!("ses: {error:?}"))
        }
        aws_sdk_ses::error::SdkError::ServiceError(_) => {
            let code = error.code().unwrap_or("unknown");
            if code.contains("Throttling") || code.contains("ServiceUnavailable") {
                SendError::Transient(format!("ses {code}"))
            } else {
                SendError::Permanent(format!("ses {code}: {}", error.message().unwrap_or("")))
            }
        }
        other => SendError::Permanent(format!("ses: {other:?}")),
    }
}

#[async_trait::async_trait]
impl Provider for Ses {
    #[tracing::instrument(name = "ses-send", skip_all)]
    async fn send(&self, envelope: &Envelope) -> Result<Receipt, SendError> {
        let raw = aws_sdk_ses::types::RawMessage::builder()
            .data(aws_sdk_ses::primitives::Blob::new(envelope.to_mime()?))
            .build()
            .map_err(|error| SendError::Permanent(format!("ses raw message: {error}")))?;

        let output = self
            .client
            .send_raw_email()
            .raw_message(raw)
            .send()
            .await
            .map_err(|error| classify(&error))?;

        Ok(Receipt {
            provider_message_id: Some(output.message_id().to_owned()),
        })
    }

    async fn test_connection(&self) -> Result<(), SendError> {
        self.client
            .get_send_quota()
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify(&error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_pair_splits_on_the_first_colon() {
        let (id, secret) = Ses::split_key("AKIA123:se:cret").unwrap();
        assert_eq!(id, "AKIA123");
        assert_eq!(secret, "se:cret");
    }

    #[test]
    fn missing_separator_is_permanent() {
        assert!(matches!(
            Ses::split_key("not-a-pair"),
            Err(SendError::Permanent(_))
        ));
    }
}
