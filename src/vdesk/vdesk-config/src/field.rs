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

//! The configuration tree. Every field carries a serde default so a partial
//! file or environment still produces a full configuration.

/// datastore connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldDatabase {
    /// `DATABASE_URL`, required.
    pub url: String,
    /// per-query deadline.
    #[serde(default = "FieldDatabase::default_timeout", with = "humantime_serde")]
    pub timeout: std::time::Duration,
}

/// attachment blob backend; attachments are refused when absent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldBlob {
    /// `BLOB_BUCKET`.
    pub bucket: String,
    /// `BLOB_ACCESS_KEY`.
    pub access_key: String,
}

/// process secrets. Values are used to derive keys and are never logged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldSecrets {
    /// `MASTER_ENCRYPTION_KEY`, seals account credentials.
    pub master_encryption_key: String,
    /// `JWT_SECRET`, consumed by the edge; carried here so one config file
    /// can feed the whole deployment.
    pub jwt_secret: String,
    /// `ADMIN_BOOTSTRAP_KEY`, one-shot first-admin creation.
    #[serde(default)]
    pub admin_bootstrap_key: Option<String>,
}

/// AI reply coordination.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldAi {
    /// `LLM_API_KEY`; AI replies are disabled when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    /// `AI_REPLY_WINDOW_SECONDS`.
    #[serde(default = "FieldAi::default_window", with = "humantime_serde")]
    pub reply_window: std::time::Duration,
    /// `AI_REPLY_MAX_PER_WINDOW`.
    #[serde(default = "FieldAi::default_max_per_window")]
    pub max_per_window: u32,
    /// process-wide cap on concurrent LLM calls.
    #[serde(default = "FieldAi::default_max_concurrent")]
    pub max_concurrent: usize,
    /// system preamble prepended to every generation request.
    #[serde(default = "FieldAi::default_preamble")]
    pub preamble: String,
    /// whether a failed generation leaves a `system` note on the thread.
    #[serde(default)]
    pub record_failures: bool,
    /// whether a rate-limited trigger leaves a `system` note on the thread.
    #[serde(default = "FieldAi::default_record_suppressions")]
    pub record_suppressions: bool,
    /// per-call deadline.
    #[serde(default = "FieldAi::default_timeout", with = "humantime_serde")]
    pub timeout: std::time::Duration,
}

/// inbound IMAP polling.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldPolling {
    /// `EMAIL_POLLING_ENABLED`.
    #[serde(default = "FieldPolling::default_enabled")]
    pub enabled: bool,
    /// `EMAIL_POLLING_INTERVAL`, per-account fetch cadence.
    #[serde(default = "FieldPolling::default_interval", with = "humantime_serde")]
    pub interval: std::time::Duration,
    /// cadence at which the supervisor reconciles workers with accounts.
    #[serde(default = "FieldPolling::default_reconcile", with = "humantime_serde")]
    pub reconcile_interval: std::time::Duration,
    /// concurrent IMAP connections tolerated per remote host.
    #[serde(default = "FieldPolling::default_per_host")]
    pub max_connections_per_host: usize,
    /// consecutive failures after which an account stops polling.
    #[serde(default = "FieldPolling::default_failure_cap")]
    pub max_consecutive_failures: u32,
    /// per-IMAP-operation deadline.
    #[serde(default = "FieldPolling::default_timeout", with = "humantime_serde")]
    pub timeout: std::time::Duration,
}

/// spam / promotion filtering.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FieldFilter {
    /// `EMAIL_SPAM_FILTER_ENABLED`.
    #[serde(default = "FieldFilter::default_enabled")]
    pub enabled: bool,
    /// `EMAIL_FILTER_PROMOTIONS`.
    #[serde(default = "FieldFilter::default_promotions")]
    pub filter_promotions: bool,
    /// `EMAIL_LOG_FILTERED`: keep a `status=filtered` row per dropped mail.
    #[serde(default)]
    pub log_filtered: bool,
    /// `EMAIL_ML_CLASSIFIER_ENABLED`.
    #[serde(default)]
    pub ml_enabled: bool,
    /// serialized naive-bayes model consumed when `ml_enabled`.
    #[serde(default)]
    pub ml_model_path: Option<std::path::PathBuf>,
    ///
    #[serde(default = "FieldFilter::default_threshold")]
    pub spam_threshold: f64,
    ///
    #[serde(default = "FieldFilter::default_threshold")]
    pub promotion_threshold: f64,
}

/// outbound delivery.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldDelivery {
    /// concurrent sends per account.
    #[serde(default = "FieldDelivery::default_pool")]
    pub max_concurrent_sends: usize,
    /// SMTP connect deadline.
    #[serde(default = "FieldDelivery::default_smtp_timeout", with = "humantime_serde")]
    pub smtp_timeout: std::time::Duration,
    /// REST provider deadline.
    #[serde(default = "FieldDelivery::default_http_timeout", with = "humantime_serde")]
    pub http_timeout: std::time::Duration,
}

/// trash retention.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldRetention {
    /// `RETENTION_DAYS`: soft-deleted tickets older than this are purged.
    #[serde(default = "FieldRetention::default_days")]
    pub days: u32,
    /// reaper cadence.
    #[serde(default = "FieldRetention::default_sweep", with = "humantime_serde")]
    pub sweep_interval: std::time::Duration,
}

/// attachment validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldAttachments {
    ///
    #[serde(default = "FieldAttachments::default_max_size")]
    pub max_size_bytes: u64,
    /// accepted media types.
    #[serde(default = "FieldAttachments::default_allowed_mime")]
    pub allowed_mime: Vec<String>,
}

/// shutdown behavior.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FieldShutdown {
    /// how long workers may drain after the stop signal.
    #[serde(default = "FieldShutdown::default_drain", with = "humantime_serde")]
    pub drain: std::time::Duration,
}
