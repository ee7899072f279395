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

use crate::AttachmentCoordinator;
use vdesk_common::{types::TicketId, Clock, Error, Store};

/// Outcome of a purge batch: hard deletes are per-id, a stuck ticket never
/// tears the whole batch.
#[derive(Debug, Default)]
pub struct PurgeReport {
    ///
    pub purged: Vec<TicketId>,
    ///
    pub failed: Vec<(TicketId, Error)>,
}

impl PurgeReport {
    ///
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Hard deletion: attachments out of the blob store first, then the
/// cascade of rows. Serves both the admin "empty trash" operation and the
/// periodic retention reaper.
pub struct TrashPurger<S> {
    store: std::sync::Arc<S>,
    attachments: std::sync::Arc<AttachmentCoordinator<S>>,
    clock: std::sync::Arc<dyn Clock>,
}

impl<S: Store> TrashPurger<S> {
    ///
    pub fn new(
        store: std::sync::Arc<S>,
        attachments: std::sync::Arc<AttachmentCoordinator<S>>,
        clock: std::sync::Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            attachments,
            clock,
        }
    }

    /// Hard-delete the given tickets. Only trashed tickets are eligible;
    /// a live id lands in the failure list.
    pub async fn hard_delete(&self, ticket_ids: &[TicketId]) -> PurgeReport {
        let mut report = PurgeReport::default();

        for &ticket_id in ticket_ids {
            match self.purge_one(ticket_id).await {
                Ok(()) => report.purged.push(ticket_id),
                Err(error) => {
                    tracing::warn!(ticket = %ticket_id, %error, "Hard delete failure.");
                    report.failed.push((ticket_id, error));
                }
            }
        }
        report
    }

    /// One reaper pass: purge every soft-deleted ticket past its retention
    /// window. Failures are logged and retried on the next tick.
    ///
    /// # Errors
    ///
    /// * store failure listing the trash
    #[tracing::instrument(skip(self))]
    pub async fn reap_once(&self, retention_days: u32) -> vdesk_common::Result<PurgeReport> {
        let cutoff = self.clock.now() - time::Duration::days(i64::from(retention_days));
        let expired = self.store.deleted_tickets_before(cutoff).await?;
        if expired.is_empty() {
            return Ok(PurgeReport::default());
        }

        let ids = expired.iter().map(|ticket| ticket.id).collect::<Vec<_>>();
        tracing::info!(count = ids.len(), "Reaping expired trash.");
        Ok(self.hard_delete(&ids).await)
    }

    async fn purge_one(&self, ticket_id: TicketId) -> vdesk_common::Result<()> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", ticket_id))?;
        if !ticket.is_deleted {
            return Err(Error::InvalidTransition(
                "only trashed tickets can be hard-deleted".to_owned(),
            ));
        }

        self.attachments.remove_all(ticket_id).await?;
        self.store.delete_ticket_cascade(ticket_id).await?;
        Ok(())
    }
}
