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

//! Traits of the collaborators the core consumes but does not implement:
//! the LLM vendor, the wall clock, randomness, and the metrics sink.
//! Everything is injectable so tests can script them.

use crate::entity::Message;

/// Output of one LLM generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReply {
    ///
    pub text: String,
    /// model self-reported confidence in `[0,1]`.
    pub confidence: f64,
}

/// Failure of the text generator, split by retry eligibility.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// network hiccup, 5xx, timeout; the coordinator retries these.
    #[error("transient generation failure: {0}")]
    Transient(String),
    /// invalid prompt, auth failure; never retried.
    #[error("permanent generation failure: {0}")]
    Permanent(String),
    /// the call outlived its deadline or the process is shutting down.
    #[error("generation cancelled")]
    Cancelled,
}

/// External LLM vendor.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a reply for the conversation so far.
    async fn generate(
        &self,
        context: &str,
        subject: &str,
        history: &[Message],
        preamble: &str,
    ) -> Result<GeneratedReply, GenerateError>;
}

/// Injectable wall clock.
pub trait Clock: Send + Sync {
    /// Current instant, UTC.
    fn now(&self) -> time::OffsetDateTime;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> time::OffsetDateTime {
        time::OffsetDateTime::now_utc()
    }
}

/// Injectable randomness, used for backoff jitter.
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, upper)` milliseconds.
    fn jitter_ms(&self, upper: u64) -> u64;
}

/// Process-wide fast RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn jitter_ms(&self, upper: u64) -> u64 {
        if upper == 0 {
            0
        } else {
            fastrand::u64(..upper)
        }
    }
}

/// Operator metrics sink. The core records, the deployment exports.
pub trait Metrics: Send + Sync {
    /// Increment a monotonic counter.
    fn incr(&self, name: &'static str);
    /// Set a gauge.
    fn gauge(&self, name: &'static str, value: f64);
}

/// Discards every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr(&self, _: &'static str) {}
    fn gauge(&self, _: &'static str, _: f64) {}
}
