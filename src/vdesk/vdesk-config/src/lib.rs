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

//! vDesk configuration: a serde tree with per-field defaults, loadable from
//! a JSON file, the environment, or both (environment wins).

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod default;
/// the configuration tree fields.
pub mod field;

pub use default::{BACKOFF_BASE, BACKOFF_CAP, SLA_SCAN_INTERVAL};

use anyhow::Context as _;
use field::{
    FieldAi, FieldAttachments, FieldBlob, FieldDatabase, FieldDelivery, FieldFilter,
    FieldPolling, FieldRetention, FieldSecrets, FieldShutdown,
};

/// Whole-process configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// accepted config file versions, same gate as the package version.
    #[serde(default = "Config::default_version_requirement")]
    pub version_requirement: semver::VersionReq,
    ///
    pub database: FieldDatabase,
    ///
    #[serde(default)]
    pub blob: Option<FieldBlob>,
    ///
    pub secrets: FieldSecrets,
    ///
    #[serde(default)]
    pub ai: FieldAi,
    ///
    #[serde(default)]
    pub polling: FieldPolling,
    ///
    #[serde(default)]
    pub filter: FieldFilter,
    ///
    #[serde(default)]
    pub delivery: FieldDelivery,
    ///
    #[serde(default)]
    pub retention: FieldRetention,
    ///
    #[serde(default)]
    pub attachments: FieldAttachments,
    ///
    #[serde(default)]
    pub shutdown: FieldShutdown,
}

fn var(env: &impl Env, key: &str) -> Option<String> {
    env.get(key).filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(env: &impl Env, key: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(env, key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: '{value}'"))
        })
        .transpose()
}

fn parse_bool(env: &impl Env, key: &str) -> anyhow::Result<Option<bool>> {
    var(env, key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("invalid value for {key}: '{other}'"),
        })
        .transpose()
}

/// Environment lookup seam, so tests can feed a map instead of the process
/// environment.
pub trait Env {
    /// `None` when the variable is unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<S: std::hash::BuildHasher> Env for std::collections::HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

impl Config {
    fn default_version_requirement() -> semver::VersionReq {
        #[allow(clippy::expect_used)]
        let current =
            semver::Version::parse(env!("CARGO_PKG_VERSION")).expect("valid semver");
        #[allow(clippy::expect_used)]
        semver::VersionReq::parse(&format!(">={}.{}, <{}", current.major, current.minor, current.major + 1))
            .expect("valid requirement")
    }

    /// Read every recognized key from the process environment.
    ///
    /// # Errors
    ///
    /// * a required key (`DATABASE_URL`, `JWT_SECRET`,
    ///   `MASTER_ENCRYPTION_KEY`) is missing
    /// * a value fails to parse
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&ProcessEnv)
    }

    /// Same as [`Config::from_env`] over an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// see [`Config::from_env`].
    pub fn from_lookup(env: &impl Env) -> anyhow::Result<Self> {
        let database = FieldDatabase {
            url: var(env, "DATABASE_URL").context("DATABASE_URL is required")?,
            timeout: FieldDatabase::default_timeout(),
        };

        let secrets = FieldSecrets {
            master_encryption_key: var(env, "MASTER_ENCRYPTION_KEY")
                .context("MASTER_ENCRYPTION_KEY is required")?,
            jwt_secret: var(env, "JWT_SECRET").context("JWT_SECRET is required")?,
            admin_bootstrap_key: var(env, "ADMIN_BOOTSTRAP_KEY"),
        };

        let blob = match (var(env, "BLOB_BUCKET"), var(env, "BLOB_ACCESS_KEY")) {
            (Some(bucket), Some(access_key)) => Some(FieldBlob { bucket, access_key }),
            (Some(_), None) => anyhow::bail!("BLOB_BUCKET is set but BLOB_ACCESS_KEY is not"),
            _ => None,
        };

        let mut ai = FieldAi {
            api_key: var(env, "LLM_API_KEY"),
            ..FieldAi::default()
        };
        if let Some(seconds) = parse_var(env, "AI_REPLY_WINDOW_SECONDS")? {
            ai.reply_window = std::time::Duration::from_secs(seconds);
        }
        if let Some(count) = parse_var(env, "AI_REPLY_MAX_PER_WINDOW")? {
            ai.max_per_window = count;
        }

        let mut polling = FieldPolling::default();
        if let Some(enabled) = parse_bool(env, "EMAIL_POLLING_ENABLED")? {
            polling.enabled = enabled;
        }
        if let Some(seconds) = parse_var(env, "EMAIL_POLLING_INTERVAL")? {
            polling.interval = std::time::Duration::from_secs(seconds);
        }

        let mut filter = FieldFilter::default();
        if let Some(enabled) = parse_bool(env, "EMAIL_SPAM_FILTER_ENABLED")? {
            filter.enabled = enabled;
        }
        if let Some(promotions) = parse_bool(env, "EMAIL_FILTER_PROMOTIONS")? {
            filter.filter_promotions = promotions;
        }
        if let Some(log_filtered) = parse_bool(env, "EMAIL_LOG_FILTERED")? {
            filter.log_filtered = log_filtered;
        }
        if let Some(ml_enabled) = parse_bool(env, "EMAIL_ML_CLASSIFIER_ENABLED")? {
            filter.ml_enabled = ml_enabled;
        }
        if let Some(path) = var(env, "EMAIL_ML_MODEL_PATH") {
            filter.ml_model_path = Some(path.into());
        }

        let mut retention = FieldRetention::default();
        if let Some(days) = parse_var(env, "RETENTION_DAYS")? {
            retention.days = days;
        }

        let config = Self {
            version_requirement: Self::default_version_requirement(),
            database,
            blob,
            secrets,
            ai,
            polling,
            filter,
            delivery: FieldDelivery::default(),
            retention,
            attachments: FieldAttachments::default(),
            shutdown: FieldShutdown::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file, then let the environment override it.
    ///
    /// # Errors
    ///
    /// * unreadable or invalid file
    /// * the file version requirement rejects this build
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config at '{}'", path.display()))?;
        let config = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("cannot parse config at '{}'", path.display()))?;

        let current = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;
        if !config.version_requirement.matches(&current) {
            anyhow::bail!(
                "config requires vdesk {}, this build is {current}",
                config.version_requirement
            );
        }
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// * a zero or senseless limit
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ai.max_per_window == 0 {
            anyhow::bail!("AI_REPLY_MAX_PER_WINDOW must be at least 1");
        }
        if self.ai.max_concurrent == 0 {
            anyhow::bail!("ai.max_concurrent must be at least 1");
        }
        if self.polling.max_connections_per_host == 0 {
            anyhow::bail!("polling.max_connections_per_host must be at least 1");
        }
        if self.retention.days == 0 {
            anyhow::bail!("RETENTION_DAYS must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.filter.spam_threshold)
            || !(0.0..=1.0).contains(&self.filter.promotion_threshold)
        {
            anyhow::bail!("filter thresholds must be within [0, 1]");
        }
        if self.filter.ml_enabled && self.filter.ml_model_path.is_none() {
            anyhow::bail!("EMAIL_ML_CLASSIFIER_ENABLED is set but EMAIL_ML_MODEL_PATH is not");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        [
            ("DATABASE_URL", "postgres://vdesk@localhost/vdesk"),
            ("JWT_SECRET", "edge-secret"),
            ("MASTER_ENCRYPTION_KEY", "seal-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::from_lookup(&base_env()).unwrap();
        assert_eq!(config.ai.reply_window, std::time::Duration::from_secs(60));
        assert_eq!(config.ai.max_per_window, 2);
        assert_eq!(config.polling.interval, std::time::Duration::from_secs(60));
        assert_eq!(config.polling.max_consecutive_failures, 5);
        assert_eq!(config.retention.days, 30);
        assert!(config.filter.enabled);
        assert!(!config.filter.log_filtered);
        assert!(!config.filter.ml_enabled);
        assert!(config.blob.is_none());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let mut env = base_env();
        env.remove("DATABASE_URL");
        assert!(Config::from_lookup(&env).is_err());
    }

    #[test]
    fn env_overrides_are_applied() {
        let mut env = base_env();
        env.insert("AI_REPLY_WINDOW_SECONDS".into(), "120".into());
        env.insert("AI_REPLY_MAX_PER_WINDOW".into(), "5".into());
        env.insert("EMAIL_POLLING_ENABLED".into(), "false".into());
        env.insert("RETENTION_DAYS".into(), "7".into());

        let config = Config::from_lookup(&env).unwrap();
        assert_eq!(config.ai.reply_window, std::time::Duration::from_secs(120));
        assert_eq!(config.ai.max_per_window, 5);
        assert!(!config.polling.enabled);
        assert_eq!(config.retention.days, 7);
    }

    #[rstest::rstest]
    #[case("1", true)]
    #[case("yes", true)]
    #[case("on", true)]
    #[case("off", false)]
    #[case("FALSE", false)]
    fn boolean_shapes(#[case] raw: &str, #[case] expected: bool) {
        let mut env = base_env();
        env.insert("EMAIL_LOG_FILTERED".into(), raw.into());
        assert_eq!(
            Config::from_lookup(&env).unwrap().filter.log_filtered,
            expected,
            "{raw}"
        );
    }

    #[test]
    fn bad_number_is_rejected_with_the_key_name() {
        let mut env = base_env();
        env.insert("RETENTION_DAYS".into(), "a month".into());
        let error = format!("{:#}", Config::from_lookup(&env).unwrap_err());
        assert!(error.contains("RETENTION_DAYS"), "{error}");
    }

    #[test]
    fn ml_flag_requires_a_model_path() {
        let mut env = base_env();
        env.insert("EMAIL_ML_CLASSIFIER_ENABLED".into(), "true".into());
        assert!(Config::from_lookup(&env).is_err());

        env.insert("EMAIL_ML_MODEL_PATH".into(), "/etc/vdesk/spam.json".into());
        assert!(Config::from_lookup(&env).is_ok());
    }

    #[test]
    fn blob_keys_come_in_pairs() {
        let mut env = base_env();
        env.insert("BLOB_BUCKET".into(), "attachments".into());
        assert!(Config::from_lookup(&env).is_err());

        env.insert("BLOB_ACCESS_KEY".into(), "ak".into());
        let config = Config::from_lookup(&env).unwrap();
        assert_eq!(config.blob.unwrap().bucket, "attachments");
    }
}
