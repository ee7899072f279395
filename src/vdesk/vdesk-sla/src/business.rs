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

//! Deadline math. Wall-clock policies are a plain addition; business-hour
//! policies accrue the budget only inside the configured window, UTC.

use vdesk_common::entity::{SlaDefinition, Weekday};

/// Compute the deadline for a budget of `minutes` starting at `from`.
///
/// Falls back to wall-clock accrual when the policy has no complete
/// business window.
#[must_use]
pub fn deadline(
    policy: &SlaDefinition,
    from: time::OffsetDateTime,
    minutes: u32,
) -> time::OffsetDateTime {
    let window = match (
        policy.business_hours_only,
        policy.business_hours_start,
        policy.business_hours_end,
    ) {
        (true, Some(start), Some(end)) if start < end && !policy.business_days.is_empty() => {
            (start.minutes(), end.minutes())
        }
        _ => return from + time::Duration::minutes(i64::from(minutes)),
    };
    let (open, close) = window;

    let mut remaining = i64::from(minutes);
    let mut cursor = from;

    // cap the walk at two years of days; a policy that cannot accrue its
    // budget within that horizon is treated as wall-clock.
    for _ in 0..=731 {
        let today_open = is_business_day(&policy.business_days, cursor.weekday());
        let minute_of_day = i64::from(cursor.hour()) * 60 + i64::from(cursor.minute());

        if today_open && minute_of_day < i64::from(close) {
            let accrual_start = minute_of_day.max(i64::from(open));
            let available = i64::from(close) - accrual_start;

            if minute_of_day < i64::from(open) {
                cursor = at_minute(cursor, i64::from(open));
            }

            if remaining <= available {
                return cursor + time::Duration::minutes(remaining);
            }
            remaining -= available;
        }

        // jump to the next day's midnight.
        cursor = at_minute(cursor + time::Duration::days(1), 0);
    }

    tracing::warn!(sla = %policy.id, "Business-hour budget never accrues, using wall clock.");
    from + time::Duration::minutes(i64::from(minutes))
}

fn is_business_day(days: &[Weekday], day: time::Weekday) -> bool {
    let day = Weekday::from(day);
    days.contains(&day)
}

fn at_minute(day: time::OffsetDateTime, minute_of_day: i64) -> time::OffsetDateTime {
    day.replace_time(time::Time::MIDNIGHT) + time::Duration::minutes(minute_of_day)
}
