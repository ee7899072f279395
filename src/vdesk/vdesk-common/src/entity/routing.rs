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
use crate::types::{Address, CategoryId, OrgId, RuleId, TagId, TicketId};

/// Condition groups of a routing rule. Groups AND together; within a group
/// any element may match. An empty group matches everything.
///
/// Conditions are deserialized once when rules are loaded, never re-parsed
/// per evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct RuleConditions {
    /// case-insensitive substrings looked up in `subject + first body`.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// matched against the ticket category, case-insensitive.
    #[serde(default)]
    pub issue_types: Vec<String>,
    /// matched against the ticket's current tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// matched exactly against `ticket.context`.
    #[serde(default)]
    pub contexts: Vec<String>,
    ///
    #[serde(default)]
    pub priorities: Vec<Priority>,
}

impl RuleConditions {
    /// A rule with no conditions at all would match every ticket; such
    /// rules are refused at load time.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.issue_types.is_empty()
            && self.tags.is_empty()
            && self.contexts.is_empty()
            && self.priorities.is_empty()
    }
}

/// Action performed by a matched routing rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleAction {
    ///
    AssignToAgent(Address),
    /// group dispatch is external; the core tags the ticket with the group
    /// name so the edge can fan out.
    AssignToGroup(String),
    ///
    SetPriority(Priority),
    ///
    AddTag(String),
    ///
    SetCategory(String),
}

impl RuleAction {
    /// short audit label, stored on the routing log.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::AssignToAgent(agent) => format!("assign_to_agent:{agent}"),
            Self::AssignToGroup(group) => format!("assign_to_group:{group}"),
            Self::SetPriority(priority) => format!("set_priority:{priority}"),
            Self::AddTag(tag) => format!("add_tag:{tag}"),
            Self::SetCategory(category) => format!("set_category:{category}"),
        }
    }
}

/// An admin-authored routing rule. Higher `priority` evaluates first; the
/// first match wins and evaluation stops.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RoutingRule {
    ///
    pub id: RuleId,
    ///
    pub organization_id: Option<OrgId>,
    ///
    pub name: String,
    /// evaluation order, descending.
    pub priority: i32,
    ///
    pub is_active: bool,
    ///
    pub conditions: RuleConditions,
    ///
    pub action: RuleAction,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// Audit record written for every routing match.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RoutingLog {
    ///
    pub ticket_id: TicketId,
    ///
    pub rule_id: RuleId,
    ///
    pub rule_name: String,
    /// [`RuleAction::describe`] output.
    pub action_taken: String,
    /// which condition groups fired, e.g. `keyword:refund`.
    pub matched_conditions: Vec<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// Org-scoped label. The tag set of a ticket is unordered and duplicate-free.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Tag {
    ///
    pub id: TagId,
    ///
    pub organization_id: Option<OrgId>,
    ///
    pub name: String,
    ///
    pub color: Option<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// Org-scoped ticket category.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Category {
    ///
    pub id: CategoryId,
    ///
    pub organization_id: Option<OrgId>,
    ///
    pub name: String,
    ///
    pub color: Option<String>,
}
