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

use crate::{
    rate::{RateBucket, RateDecision},
    sanitize::Sanitizer,
};
use vdesk_common::{
    entity::Message, types::TicketId, Clock, Error, GenerateError, GeneratedReply, Metrics,
    KeyedLocks, RandomSource, Store, TextGenerator,
};
use vdesk_config::field::FieldAi;
use vdesk_ticket::{AiTrigger, TicketStateManager};

/// What happened to one trigger.
#[derive(Debug, Clone, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AiOutcome {
    /// a sanitized reply was committed.
    Replied(Message),
    /// the per-ticket window was full; nothing was queued.
    RateLimited,
    /// the ticket stopped being eligible (assigned, closed) before or
    /// after generation; the reply, if any, was dropped.
    Discarded,
    /// generation failed after retries.
    Failed,
}

/// Generates at most one AI reply per trigger, with per-ticket
/// single-flight, the sliding rate window and mandatory sanitization.
pub struct AiCoordinator<S> {
    manager: std::sync::Arc<TicketStateManager<S>>,
    generator: std::sync::Arc<dyn TextGenerator>,
    clock: std::sync::Arc<dyn Clock>,
    random: std::sync::Arc<dyn RandomSource>,
    metrics: std::sync::Arc<dyn Metrics>,
    settings: FieldAi,
    rate: RateBucket,
    // one flight per ticket; a second trigger parks here and re-checks
    // eligibility once the first lands.
    flights: KeyedLocks<TicketId>,
    permits: std::sync::Arc<tokio::sync::Semaphore>,
    sanitizer: Sanitizer,
}

impl<S: Store> AiCoordinator<S> {
    ///
    #[must_use]
    pub fn new(
        manager: std::sync::Arc<TicketStateManager<S>>,
        generator: std::sync::Arc<dyn TextGenerator>,
        clock: std::sync::Arc<dyn Clock>,
        random: std::sync::Arc<dyn RandomSource>,
        metrics: std::sync::Arc<dyn Metrics>,
        settings: FieldAi,
    ) -> Self {
        Self {
            rate: RateBucket::new(settings.reply_window, settings.max_per_window),
            permits: std::sync::Arc::new(tokio::sync::Semaphore::new(settings.max_concurrent)),
            manager,
            generator,
            clock,
            random,
            metrics,
            settings,
            flights: KeyedLocks::new(),
            sanitizer: Sanitizer::new(),
        }
    }

    /// Process one trigger end to end.
    ///
    /// # Errors
    ///
    /// * store failure
    /// * [`Error::Cancelled`] when shutdown interrupts the generation
    #[tracing::instrument(skip(self), fields(ticket = %trigger.ticket_id))]
    pub async fn handle_trigger(&self, trigger: AiTrigger) -> vdesk_common::Result<AiOutcome> {
        // single-flight: coalesce onto the running generation, then
        // re-check eligibility from scratch.
        let _flight = self.flights.lock(trigger.ticket_id).await;

        let ticket = match self.manager.ticket(trigger.ticket_id).await {
            Ok(ticket) => ticket,
            Err(Error::NotFound { .. }) => return Ok(AiOutcome::Discarded),
            Err(error) => return Err(error),
        };
        if !ticket.accepts_ai_reply() {
            self.metrics.incr("ai.trigger.stale");
            return Ok(AiOutcome::Discarded);
        }

        match self.rate.try_acquire(ticket.id, self.clock.now()) {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after } => {
                self.metrics.incr("ai.trigger.rate_limited");
                tracing::debug!(?retry_after, "AI reply suppressed by rate limit.");
                if self.settings.record_suppressions {
                    self.manager
                        .append_system_note(
                            ticket.id,
                            "AI reply suppressed: rate limit reached for this ticket.",
                        )
                        .await?;
                }
                return Ok(AiOutcome::RateLimited);
            }
        }

        let history = self.manager.thread(ticket.id).await?;
        let reply = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| Error::Cancelled)?;
            self.generate_with_retry(&ticket.context, &ticket.subject, &history)
                .await
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(GenerateError::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                self.metrics.incr("ai.generation.failed");
                tracing::warn!(%error, "AI generation failed after retries.");
                if self.settings.record_failures {
                    self.manager
                        .append_system_note(ticket.id, "AI reply failed.")
                        .await?;
                }
                return Ok(AiOutcome::Failed);
            }
        };

        // mandatory; there is no code path that commits unsanitized text.
        let text = self.sanitizer.sanitize(&reply.text);

        match self
            .manager
            .append_ai_reply(ticket.id, &text, reply.confidence, true)
            .await
        {
            Ok(message) => {
                self.metrics.incr("ai.reply.committed");
                self.rate.shrink(self.clock.now());
                Ok(AiOutcome::Replied(message))
            }
            // the ticket was taken over or closed while we generated.
            Err(Error::InvalidTransition(reason)) => {
                self.metrics.incr("ai.reply.discarded");
                tracing::info!(%reason, "Discarding AI reply after commit re-check.");
                Ok(AiOutcome::Discarded)
            }
            Err(error) => Err(error),
        }
    }

    async fn generate_with_retry(
        &self,
        context: &str,
        subject: &str,
        history: &[Message],
    ) -> Result<GeneratedReply, GenerateError> {
        let mut attempt = 0_u32;
        loop {
            let outcome = tokio::time::timeout(
                self.settings.timeout,
                self.generator
                    .generate(context, subject, history, &self.settings.preamble),
            )
            .await
            .unwrap_or_else(|_| {
                Err(GenerateError::Transient("generation timed out".to_owned()))
            });

            match outcome {
                Ok(reply) => return Ok(reply),
                Err(GenerateError::Transient(reason)) if attempt < 2 => {
                    let base_ms = 500_u64 << attempt;
                    let delay = std::time::Duration::from_millis(
                        base_ms + self.random.jitter_ms(base_ms / 2),
                    );
                    tracing::warn!(%reason, attempt, ?delay, "Transient generation failure.");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
