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

use crate::business;
use vdesk_common::{
    entity::{SlaDefinition, SlaViolation, Ticket, ViolationType},
    types::{TicketId, ViolationId},
    Clock, Error, Store,
};

/// One deadline of a ticket: what was promised, what happened.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeadlineStatus {
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub expected: time::OffsetDateTime,
    ///
    #[serde(with = "time::serde::rfc3339::option")]
    pub actual: Option<time::OffsetDateTime>,
    /// breached: the actual (or current) time is past the expected one.
    pub violated: bool,
}

/// Answer of [`SlaTracker::status`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SlaStatus {
    ///
    pub sla: SlaDefinition,
    ///
    pub response: DeadlineStatus,
    ///
    pub resolution: DeadlineStatus,
}

/// Watches linked tickets against their SLA policies and records breaches.
pub struct SlaTracker<S> {
    store: std::sync::Arc<S>,
    clock: std::sync::Arc<dyn Clock>,
}

impl<S: Store> SlaTracker<S> {
    ///
    pub fn new(store: std::sync::Arc<S>, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The active policy a freshly created or re-prioritized ticket links.
    ///
    /// # Errors
    ///
    /// * store failure
    pub async fn policy_for(
        &self,
        priority: vdesk_common::entity::Priority,
    ) -> vdesk_common::Result<Option<SlaDefinition>> {
        Ok(self.store.active_sla_for_priority(priority).await?)
    }

    /// Record the outcome of the first admin reply: resolves a pending
    /// response violation, or files a late one that the scanner missed.
    ///
    /// # Errors
    ///
    /// * store failure
    pub async fn record_first_response(
        &self,
        ticket: &Ticket,
        responded_at: time::OffsetDateTime,
    ) -> vdesk_common::Result<()> {
        let Some(policy) = self.linked_policy(ticket).await? else {
            return Ok(());
        };

        let expected =
            business::deadline(&policy, ticket.created_at, policy.response_time_minutes);
        if responded_at <= expected {
            return Ok(());
        }

        let minutes_late = (responded_at - expected).whole_minutes();
        if self
            .store
            .has_sla_violation(ticket.id, ViolationType::ResponseTime)
            .await?
        {
            self.store
                .resolve_sla_violation(
                    ticket.id,
                    ViolationType::ResponseTime,
                    responded_at,
                    minutes_late,
                )
                .await?;
        } else {
            self.insert_violation(
                ticket,
                &policy,
                ViolationType::ResponseTime,
                expected,
                Some(responded_at),
                minutes_late,
            )
            .await?;
        }
        Ok(())
    }

    /// Same bookkeeping for the close of a ticket.
    ///
    /// # Errors
    ///
    /// * store failure
    pub async fn record_resolution(
        &self,
        ticket: &Ticket,
        resolved_at: time::OffsetDateTime,
    ) -> vdesk_common::Result<()> {
        let Some(policy) = self.linked_policy(ticket).await? else {
            return Ok(());
        };

        let expected =
            business::deadline(&policy, ticket.created_at, policy.resolution_time_minutes);
        if resolved_at <= expected {
            return Ok(());
        }

        let minutes_late = (resolved_at - expected).whole_minutes();
        if self
            .store
            .has_sla_violation(ticket.id, ViolationType::ResolutionTime)
            .await?
        {
            self.store
                .resolve_sla_violation(
                    ticket.id,
                    ViolationType::ResolutionTime,
                    resolved_at,
                    minutes_late,
                )
                .await?;
        } else {
            self.insert_violation(
                ticket,
                &policy,
                ViolationType::ResolutionTime,
                expected,
                Some(resolved_at),
                minutes_late,
            )
            .await?;
        }
        Ok(())
    }

    /// One pass of the minute scanner: file a violation for every linked
    /// open ticket whose deadline has passed unanswered and is not yet on
    /// record. The violation stays unresolved (`actual_time=None`) until
    /// the reply or close happens.
    ///
    /// # Errors
    ///
    /// * store failure listing candidates; per-ticket failures are logged
    ///   and retried on the next tick.
    #[tracing::instrument(skip_all)]
    pub async fn scan_once(&self) -> vdesk_common::Result<usize> {
        let now = self.clock.now();
        let mut recorded = 0_usize;

        for ticket in self.store.open_tickets_with_sla().await? {
            match self.scan_ticket(&ticket, now).await {
                Ok(count) => recorded += count,
                Err(error) => {
                    tracing::error!(ticket = %ticket.id, %error, "SLA scan failure.");
                }
            }
        }

        if recorded > 0 {
            tracing::info!(recorded, "SLA violations recorded.");
        }
        Ok(recorded)
    }

    async fn scan_ticket(
        &self,
        ticket: &Ticket,
        now: time::OffsetDateTime,
    ) -> vdesk_common::Result<usize> {
        let Some(policy) = self.linked_policy(ticket).await? else {
            return Ok(0);
        };
        let mut recorded = 0;

        if ticket.first_response_at.is_none() {
            let expected =
                business::deadline(&policy, ticket.created_at, policy.response_time_minutes);
            if now > expected
                && !self
                    .store
                    .has_sla_violation(ticket.id, ViolationType::ResponseTime)
                    .await?
            {
                self.insert_violation(
                    ticket,
                    &policy,
                    ViolationType::ResponseTime,
                    expected,
                    None,
                    (now - expected).whole_minutes(),
                )
                .await?;
                recorded += 1;
            }
        }

        if ticket.resolved_at.is_none() {
            let expected =
                business::deadline(&policy, ticket.created_at, policy.resolution_time_minutes);
            if now > expected
                && !self
                    .store
                    .has_sla_violation(ticket.id, ViolationType::ResolutionTime)
                    .await?
            {
                self.insert_violation(
                    ticket,
                    &policy,
                    ViolationType::ResolutionTime,
                    expected,
                    None,
                    (now - expected).whole_minutes(),
                )
                .await?;
                recorded += 1;
            }
        }

        Ok(recorded)
    }

    /// Deadline overview of one ticket, served to admins.
    ///
    /// # Errors
    ///
    /// * unknown ticket or missing policy
    pub async fn status(&self, ticket_id: TicketId) -> vdesk_common::Result<SlaStatus> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", ticket_id))?;
        let policy = self
            .linked_policy(&ticket)
            .await?
            .ok_or_else(|| Error::not_found("sla", "unlinked"))?;

        let now = self.clock.now();
        let expected_response =
            business::deadline(&policy, ticket.created_at, policy.response_time_minutes);
        let expected_resolution =
            business::deadline(&policy, ticket.created_at, policy.resolution_time_minutes);

        Ok(SlaStatus {
            response: DeadlineStatus {
                expected: expected_response,
                actual: ticket.first_response_at,
                violated: ticket.first_response_at.unwrap_or(now) > expected_response,
            },
            resolution: DeadlineStatus {
                expected: expected_resolution,
                actual: ticket.resolved_at,
                violated: ticket.resolved_at.unwrap_or(now) > expected_resolution,
            },
            sla: policy,
        })
    }

    async fn linked_policy(&self, ticket: &Ticket) -> vdesk_common::Result<Option<SlaDefinition>> {
        let Some(sla_id) = ticket.sla_id else {
            return Ok(None);
        };
        Ok(self.store.sla_definition(sla_id).await?)
    }

    async fn insert_violation(
        &self,
        ticket: &Ticket,
        policy: &SlaDefinition,
        violation_type: ViolationType,
        expected: time::OffsetDateTime,
        actual: Option<time::OffsetDateTime>,
        minutes_late: i64,
    ) -> vdesk_common::Result<()> {
        self.store
            .insert_sla_violation(&SlaViolation {
                id: ViolationId::new(),
                ticket_id: ticket.id,
                sla_id: policy.id,
                violation_type,
                expected_time: expected,
                actual_time: actual,
                violation_minutes: Some(minutes_late),
                is_resolved: actual.is_some(),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }
}
