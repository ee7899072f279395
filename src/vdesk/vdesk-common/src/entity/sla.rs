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

use super::Priority;
use crate::types::{SlaId, TicketId, ViolationId};

/// Day of week used by business-hour policies. A dedicated type because the
/// `time` crate's `Weekday` has no serde representation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<time::Weekday> for Weekday {
    fn from(value: time::Weekday) -> Self {
        match value {
            time::Weekday::Monday => Self::Monday,
            time::Weekday::Tuesday => Self::Tuesday,
            time::Weekday::Wednesday => Self::Wednesday,
            time::Weekday::Thursday => Self::Thursday,
            time::Weekday::Friday => Self::Friday,
            time::Weekday::Saturday => Self::Saturday,
            time::Weekday::Sunday => Self::Sunday,
        }
    }
}

/// Wall-clock boundary of a business-hours window, UTC, minute granularity.
/// Rendered `"HH:MM"`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
pub struct BusinessTime(u16);

impl BusinessTime {
    /// Build from hours and minutes.
    ///
    /// # Errors
    ///
    /// * out of range input
    pub fn new(hour: u8, minute: u8) -> anyhow::Result<Self> {
        if hour > 23 || minute > 59 {
            anyhow::bail!("'{hour:02}:{minute:02}' is not a valid time of day");
        }
        Ok(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    /// Minutes since midnight UTC.
    #[must_use]
    pub const fn minutes(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for BusinessTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl std::str::FromStr for BusinessTime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("'{s}' is not a valid time of day"))?;
        Self::new(hour.parse()?, minute.parse()?)
    }
}

/// A response/resolution deadline policy, scoped to one priority.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SlaDefinition {
    ///
    pub id: SlaId,
    ///
    pub priority: Priority,
    /// first-admin-reply deadline, minutes from ticket creation.
    pub response_time_minutes: u32,
    /// close deadline, minutes from ticket creation.
    pub resolution_time_minutes: u32,
    /// when set, deadline minutes accrue only inside the window below.
    pub business_hours_only: bool,
    ///
    pub business_hours_start: Option<BusinessTime>,
    ///
    pub business_hours_end: Option<BusinessTime>,
    ///
    pub business_days: Vec<Weekday>,
    ///
    pub is_active: bool,
}

/// Deadline family a violation belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ///
    ResponseTime,
    ///
    ResolutionTime,
}

/// A recorded SLA breach. `actual_time` stays empty while the breach is
/// still running (no reply/close yet).
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SlaViolation {
    ///
    pub id: ViolationId,
    ///
    pub ticket_id: TicketId,
    ///
    pub sla_id: SlaId,
    ///
    pub violation_type: ViolationType,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub expected_time: time::OffsetDateTime,
    ///
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub actual_time: Option<time::OffsetDateTime>,
    /// minutes past the deadline at record time.
    pub violation_minutes: Option<i64>,
    ///
    pub is_resolved: bool,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}
