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

use crate::types::{AccountId, Address, OrgId};

/// Outbound provider wired to an email account.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    ///
    Smtp,
    ///
    Sendgrid,
    ///
    Ses,
    ///
    Mailgun,
    /// provider handled outside the dispatcher; sends are rejected.
    Other,
}

/// An encrypted credential at rest. The content is produced and consumed by
/// `vdesk-seal` only; everything else treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct SealedBlob(pub String);

impl SealedBlob {
    /// The serialized envelope.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A mailbox the platform sends from and/or polls.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EmailAccount {
    ///
    pub id: AccountId,
    ///
    pub organization_id: Option<OrgId>,
    ///
    pub address: Address,
    /// display name used in the `From` header.
    pub display_name: Option<String>,
    ///
    pub provider: ProviderKind,
    /// sealed SMTP/IMAP password.
    pub sealed_password: Option<SealedBlob>,
    /// sealed REST API key for sendgrid/ses/mailgun.
    pub sealed_api_key: Option<SealedBlob>,
    ///
    pub smtp_host: Option<String>,
    ///
    pub smtp_port: Option<u16>,
    ///
    pub imap_host: Option<String>,
    ///
    pub imap_port: Option<u16>,
    /// whether the inbound poller owns a worker for this account.
    pub imap_enabled: bool,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_polled_at: Option<time::OffsetDateTime>,
    ///
    pub is_active: bool,
    /// at most one default per organization; the default active account is
    /// the sender when a ticket send names none.
    pub is_default: bool,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl EmailAccount {
    /// Should the poller supervisor run a worker for this account.
    #[must_use]
    pub const fn wants_polling(&self) -> bool {
        self.imap_enabled && self.is_active
    }

    /// IMAP endpoint, auto-detected from the mailbox domain when the
    /// account does not carry one.
    #[must_use]
    pub fn imap_endpoint(&self) -> Option<(String, u16)> {
        if let Some(host) = &self.imap_host {
            return Some((host.clone(), self.imap_port.unwrap_or(993)));
        }
        let domain = self.address.domain().to_ascii_lowercase();
        match domain.as_str() {
            "gmail.com" | "googlemail.com" => Some(("imap.gmail.com".to_owned(), 993)),
            "outlook.com" | "hotmail.com" | "live.com" | "office365.com" => {
                Some(("outlook.office365.com".to_owned(), 993))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;

    fn account(address: &str) -> EmailAccount {
        EmailAccount {
            id: AccountId::new(),
            organization_id: None,
            address: addr!(address),
            display_name: None,
            provider: ProviderKind::Smtp,
            sealed_password: None,
            sealed_api_key: None,
            smtp_host: None,
            smtp_port: None,
            imap_host: None,
            imap_port: None,
            imap_enabled: true,
            last_polled_at: None,
            is_active: true,
            is_default: false,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn gmail_endpoint_detected() {
        assert_eq!(
            account("support@gmail.com").imap_endpoint(),
            Some(("imap.gmail.com".to_owned(), 993))
        );
    }

    #[test]
    fn explicit_host_wins_over_detection() {
        let mut acc = account("support@gmail.com");
        acc.imap_host = Some("mail.internal".to_owned());
        acc.imap_port = Some(1993);
        assert_eq!(
            acc.imap_endpoint(),
            Some(("mail.internal".to_owned(), 1993))
        );
    }

    #[test]
    fn unknown_domain_has_no_endpoint() {
        assert_eq!(account("support@acme.test").imap_endpoint(), None);
    }
}
