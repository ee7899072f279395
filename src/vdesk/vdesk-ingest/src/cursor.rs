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

use vdesk_config::{BACKOFF_BASE, BACKOFF_CAP};

/// In-memory poll position of one account worker. Rebuilt from UNSEEN
/// search results after a restart; persistence is not needed because the
/// `(account, message_id)` uniqueness absorbs re-reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollerCursor {
    /// highest UID processed in the selected mailbox.
    pub last_seen_uid: u32,
    ///
    pub last_polled_at: Option<time::OffsetDateTime>,
    ///
    pub consecutive_failures: u32,
}

impl PollerCursor {
    /// Register a clean pass over the mailbox.
    pub fn succeed(&mut self, now: time::OffsetDateTime) {
        self.last_polled_at = Some(now);
        self.consecutive_failures = 0;
    }

    /// Register a failed pass and compute the backoff before the next one:
    /// exponential from one second, capped at five minutes.
    pub fn fail(&mut self) -> std::time::Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        let delay = BACKOFF_BASE.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(BACKOFF_CAP)
    }

    /// Advance past a processed UID.
    pub fn advance(&mut self, uid: u32) {
        if uid > self.last_seen_uid {
            self.last_seen_uid = uid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_from_one_second() {
        let mut cursor = PollerCursor::default();
        assert_eq!(cursor.fail(), std::time::Duration::from_secs(1));
        assert_eq!(cursor.fail(), std::time::Duration::from_secs(2));
        assert_eq!(cursor.fail(), std::time::Duration::from_secs(4));
        assert_eq!(cursor.consecutive_failures, 3);
    }

    #[test]
    fn backoff_caps_at_five_minutes() {
        let mut cursor = PollerCursor::default();
        for _ in 0..32 {
            cursor.fail();
        }
        assert_eq!(cursor.fail(), std::time::Duration::from_secs(300));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let mut cursor = PollerCursor::default();
        cursor.fail();
        cursor.fail();
        cursor.succeed(time::OffsetDateTime::UNIX_EPOCH);
        assert_eq!(cursor.consecutive_failures, 0);
        assert_eq!(cursor.fail(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut cursor = PollerCursor::default();
        cursor.advance(10);
        cursor.advance(7);
        assert_eq!(cursor.last_seen_uid, 10);
    }
}
