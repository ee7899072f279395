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

use crate::field::{
    FieldAi, FieldAttachments, FieldDatabase, FieldDelivery, FieldFilter, FieldPolling,
    FieldRetention, FieldShutdown,
};

const SECOND: std::time::Duration = std::time::Duration::from_secs(1);

impl FieldDatabase {
    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }
}

impl FieldAi {
    pub(crate) const fn default_window() -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    pub(crate) const fn default_max_per_window() -> u32 {
        2
    }

    pub(crate) const fn default_max_concurrent() -> usize {
        8
    }

    pub(crate) fn default_preamble() -> String {
        "You are a support assistant. Answer from the conversation only, \
         be concise, and never invent account or billing details."
            .to_owned()
    }

    pub(crate) const fn default_record_suppressions() -> bool {
        true
    }

    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

impl Default for FieldAi {
    fn default() -> Self {
        Self {
            api_key: None,
            reply_window: Self::default_window(),
            max_per_window: Self::default_max_per_window(),
            max_concurrent: Self::default_max_concurrent(),
            preamble: Self::default_preamble(),
            record_failures: false,
            record_suppressions: Self::default_record_suppressions(),
            timeout: Self::default_timeout(),
        }
    }
}

impl FieldPolling {
    pub(crate) const fn default_enabled() -> bool {
        true
    }

    pub(crate) const fn default_interval() -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    pub(crate) const fn default_reconcile() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    pub(crate) const fn default_per_host() -> usize {
        4
    }

    pub(crate) const fn default_failure_cap() -> u32 {
        5
    }

    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }
}

impl Default for FieldPolling {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            interval: Self::default_interval(),
            reconcile_interval: Self::default_reconcile(),
            max_connections_per_host: Self::default_per_host(),
            max_consecutive_failures: Self::default_failure_cap(),
            timeout: Self::default_timeout(),
        }
    }
}

impl FieldFilter {
    pub(crate) const fn default_enabled() -> bool {
        true
    }

    pub(crate) const fn default_promotions() -> bool {
        true
    }

    pub(crate) const fn default_threshold() -> f64 {
        0.5
    }
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            filter_promotions: Self::default_promotions(),
            log_filtered: false,
            ml_enabled: false,
            ml_model_path: None,
            spam_threshold: Self::default_threshold(),
            promotion_threshold: Self::default_threshold(),
        }
    }
}

impl FieldDelivery {
    pub(crate) const fn default_pool() -> usize {
        4
    }

    pub(crate) const fn default_smtp_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(15)
    }

    pub(crate) const fn default_http_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

impl Default for FieldDelivery {
    fn default() -> Self {
        Self {
            max_concurrent_sends: Self::default_pool(),
            smtp_timeout: Self::default_smtp_timeout(),
            http_timeout: Self::default_http_timeout(),
        }
    }
}

impl FieldRetention {
    pub(crate) const fn default_days() -> u32 {
        30
    }

    pub(crate) const fn default_sweep() -> std::time::Duration {
        std::time::Duration::from_secs(60 * 60)
    }
}

impl Default for FieldRetention {
    fn default() -> Self {
        Self {
            days: Self::default_days(),
            sweep_interval: Self::default_sweep(),
        }
    }
}

impl FieldAttachments {
    pub(crate) const fn default_max_size() -> u64 {
        10 * 1024 * 1024
    }

    pub(crate) fn default_allowed_mime() -> Vec<String> {
        [
            "image/png",
            "image/jpeg",
            "image/gif",
            "image/webp",
            "application/pdf",
            "text/plain",
            "text/csv",
            "application/msword",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "application/vnd.ms-excel",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/zip",
            "audio/mpeg",
            "video/mp4",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }
}

impl Default for FieldAttachments {
    fn default() -> Self {
        Self {
            max_size_bytes: Self::default_max_size(),
            allowed_mime: Self::default_allowed_mime(),
        }
    }
}

impl FieldShutdown {
    pub(crate) const fn default_drain() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}

impl Default for FieldShutdown {
    fn default() -> Self {
        Self {
            drain: Self::default_drain(),
        }
    }
}

/// the SLA scanner tick is fixed at one minute; exposed for tests.
pub const SLA_SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// backoff base of the poller and the senders.
pub const BACKOFF_BASE: std::time::Duration = SECOND;

/// backoff ceiling of the poller.
pub const BACKOFF_CAP: std::time::Duration = std::time::Duration::from_secs(5 * 60);
