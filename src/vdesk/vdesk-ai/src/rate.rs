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

use std::collections::{HashMap, VecDeque};
use vdesk_common::types::TicketId;

/// Whether a generation may start now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// proceed; the slot is already reserved.
    Allowed,
    /// the window is full; retry after the hint. Triggers are dropped,
    /// never queued.
    Limited {
        /// when the oldest reservation leaves the window.
        retry_after: std::time::Duration,
    },
}

/// Per-ticket sliding window over AI generation starts. Process-local by
/// design; a multi-node deployment pins a ticket to one node.
pub struct RateBucket {
    window: time::Duration,
    max_per_window: usize,
    slots: std::sync::Mutex<HashMap<TicketId, VecDeque<time::OffsetDateTime>>>,
}

impl RateBucket {
    ///
    #[must_use]
    pub fn new(window: std::time::Duration, max_per_window: u32) -> Self {
        Self {
            window: time::Duration::try_from(window)
                .unwrap_or_else(|_| time::Duration::seconds(60)),
            max_per_window: max_per_window as usize,
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot, or report how long the window stays full. The slot
    /// is consumed even if the generation later fails, which keeps the
    /// "at most N per window" property observable from the outside.
    pub fn try_acquire(&self, ticket_id: TicketId, now: time::OffsetDateTime) -> RateDecision {
        #[allow(clippy::expect_used)]
        let mut slots = self.slots.lock().expect("rate bucket poisoned");
        let window = self.window;

        let entries = slots.entry(ticket_id).or_default();
        while let Some(oldest) = entries.front() {
            if now - *oldest >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() < self.max_per_window {
            entries.push_back(now);
            return RateDecision::Allowed;
        }

        let oldest = entries.front().copied().unwrap_or(now);
        let retry_after = (oldest + window) - now;
        RateDecision::Limited {
            retry_after: retry_after
                .try_into()
                .unwrap_or(std::time::Duration::ZERO),
        }
    }

    /// Drop empty windows; called opportunistically by the coordinator.
    pub fn shrink(&self, now: time::OffsetDateTime) {
        #[allow(clippy::expect_used)]
        let mut slots = self.slots.lock().expect("rate bucket poisoned");
        let window = self.window;
        slots.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|newest| now - *newest < window)
        });
    }

    /// Number of tickets currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.slots.lock().expect("rate bucket poisoned").len()
    }
}
