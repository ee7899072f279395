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

//! First-match routing over typed condition groups.
//!
//! Rules are materialized once per evaluation batch; conditions were parsed
//! when the rows were deserialized, so evaluation is pure string and enum
//! comparison. The ticket state manager executes the returned action and
//! writes the audit row.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use vdesk_common::{
    entity::{RoutingRule, RuleAction, Ticket},
    types::RuleId,
};

/// What the engine matches a rule against: the ticket row plus the pieces
/// the caller already has in hand.
#[derive(Debug)]
pub struct EvalInput<'a> {
    ///
    pub ticket: &'a Ticket,
    /// body of the first customer message.
    pub first_message: &'a str,
    /// current tag names on the ticket.
    pub tag_names: &'a [String],
}

/// A winning rule and the audit trail of why it won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    ///
    pub rule_id: RuleId,
    ///
    pub rule_name: String,
    ///
    pub action: RuleAction,
    /// which condition elements fired, e.g. `keyword:refund`.
    pub matched_conditions: Vec<String>,
}

/// The loaded rule set, ordered for evaluation.
pub struct RuleEngine {
    rules: Vec<RoutingRule>,
}

impl RuleEngine {
    /// Build from freshly loaded rows: inactive rules are dropped,
    /// condition-less rules are refused (they would match everything), and
    /// the rest is sorted by descending priority.
    #[must_use]
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.retain(|rule| {
            if !rule.is_active {
                return false;
            }
            if rule.conditions.is_empty() {
                tracing::warn!(rule = %rule.name, "Routing rule has no conditions, ignored.");
                return false;
            }
            true
        });
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// Number of evaluable rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when no rule survived loading.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate in priority order and stop at the first match.
    #[must_use]
    pub fn evaluate(&self, input: &EvalInput<'_>) -> Option<RuleMatch> {
        // tickets of another organization never see the rule.
        let scoped = self.rules.iter().filter(|rule| {
            rule.organization_id.is_none()
                || rule.organization_id == input.ticket.organization_id
        });

        for rule in scoped {
            if let Some(matched_conditions) = match_rule(rule, input) {
                tracing::debug!(
                    rule = %rule.name,
                    ticket = %input.ticket.id,
                    ?matched_conditions,
                    "Routing rule matched."
                );
                return Some(RuleMatch {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    action: rule.action.clone(),
                    matched_conditions,
                });
            }
        }
        None
    }
}

/// All five groups must accept (AND); inside a group one element suffices
/// (OR). Empty groups accept by definition.
fn match_rule(rule: &RoutingRule, input: &EvalInput<'_>) -> Option<Vec<String>> {
    let mut matched = Vec::new();
    let conditions = &rule.conditions;

    if !conditions.keywords.is_empty() {
        let haystack = format!(
            "{} {}",
            input.ticket.subject.to_lowercase(),
            input.first_message.to_lowercase()
        );
        let keyword = conditions
            .keywords
            .iter()
            .find(|keyword| haystack.contains(&keyword.to_lowercase()))?;
        matched.push(format!("keyword:{keyword}"));
    }

    if !conditions.issue_types.is_empty() {
        let category = input.ticket.category.as_deref()?;
        let issue_type = conditions
            .issue_types
            .iter()
            .find(|issue| issue.eq_ignore_ascii_case(category))?;
        matched.push(format!("issue_type:{issue_type}"));
    }

    if !conditions.tags.is_empty() {
        let tag = conditions.tags.iter().find(|tag| {
            input
                .tag_names
                .iter()
                .any(|present| present.eq_ignore_ascii_case(tag))
        })?;
        matched.push(format!("tag:{tag}"));
    }

    if !conditions.contexts.is_empty() {
        let context = conditions
            .contexts
            .iter()
            .find(|context| **context == input.ticket.context)?;
        matched.push(format!("context:{context}"));
    }

    if !conditions.priorities.is_empty() {
        let priority = conditions
            .priorities
            .iter()
            .find(|priority| **priority == input.ticket.priority)?;
        matched.push(format!("priority:{priority}"));
    }

    Some(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vdesk_common::{
        entity::{Priority, RuleConditions, TicketSource, TicketStatus},
        types::TicketId,
    };

    fn ticket(subject: &str) -> Ticket {
        let now = time::OffsetDateTime::UNIX_EPOCH;
        Ticket {
            id: TicketId::new(),
            organization_id: None,
            user_id: None,
            context: "acme".to_owned(),
            subject: subject.to_owned(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            source: TicketSource::Web,
            category: None,
            assigned_to: None,
            sla_id: None,
            is_deleted: false,
            deleted_at: None,
            first_response_at: None,
            last_response_at: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(name: &str, priority: i32, conditions: RuleConditions, action: RuleAction) -> RoutingRule {
        RoutingRule {
            id: RuleId::new(),
            organization_id: None,
            name: name.to_owned(),
            priority,
            is_active: true,
            conditions,
            action,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn keywords(words: &[&str]) -> RuleConditions {
        RuleConditions {
            keywords: words.iter().map(|w| (*w).to_owned()).collect(),
            ..RuleConditions::default()
        }
    }

    #[test]
    fn first_match_wins_by_priority() {
        let engine = RuleEngine::new(vec![
            rule(
                "tag-billing",
                5,
                keywords(&["refund"]),
                RuleAction::AddTag("billing".to_owned()),
            ),
            rule(
                "escalate-refunds",
                10,
                keywords(&["refund"]),
                RuleAction::SetPriority(Priority::High),
            ),
        ]);

        let ticket = ticket("Refund please");
        let hit = engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "I want my money back",
                tag_names: &[],
            })
            .unwrap();

        assert_eq!(hit.rule_name, "escalate-refunds");
        assert_eq!(hit.action, RuleAction::SetPriority(Priority::High));
        assert_eq!(hit.matched_conditions, vec!["keyword:refund".to_owned()]);
    }

    #[test]
    fn keyword_matches_the_first_body_too() {
        let engine = RuleEngine::new(vec![rule(
            "vip",
            1,
            keywords(&["enterprise plan"]),
            RuleAction::AddTag("vip".to_owned()),
        )]);

        let ticket = ticket("Question");
        assert!(engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "We are on the Enterprise Plan and ...",
                tag_names: &[],
            })
            .is_some());
    }

    #[test]
    fn groups_and_together() {
        let conditions = RuleConditions {
            keywords: vec!["refund".to_owned()],
            contexts: vec!["other-context".to_owned()],
            ..RuleConditions::default()
        };
        let engine = RuleEngine::new(vec![rule(
            "strict",
            1,
            conditions,
            RuleAction::AddTag("x".to_owned()),
        )]);

        // keyword matches but the context group does not.
        let ticket = ticket("refund");
        assert!(engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "",
                tag_names: &[],
            })
            .is_none());
    }

    #[test]
    fn inactive_and_empty_rules_are_dropped() {
        let mut inactive = rule(
            "off",
            99,
            keywords(&["x"]),
            RuleAction::AddTag("x".to_owned()),
        );
        inactive.is_active = false;
        let empty = rule(
            "matches-everything",
            98,
            RuleConditions::default(),
            RuleAction::AddTag("x".to_owned()),
        );
        let engine = RuleEngine::new(vec![inactive, empty]);
        assert!(engine.is_empty());
    }

    #[test]
    fn org_scoped_rules_skip_foreign_tickets() {
        let mut scoped = rule(
            "scoped",
            1,
            keywords(&["help"]),
            RuleAction::AddTag("x".to_owned()),
        );
        scoped.organization_id = Some(vdesk_common::types::OrgId::new());
        let engine = RuleEngine::new(vec![scoped]);

        let ticket = ticket("help");
        assert!(engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "help",
                tag_names: &[],
            })
            .is_none());
    }

    #[test]
    fn priority_group_matches_the_ticket_priority() {
        let conditions = RuleConditions {
            priorities: vec![Priority::Urgent],
            ..RuleConditions::default()
        };
        let engine = RuleEngine::new(vec![rule(
            "urgent-only",
            1,
            conditions,
            RuleAction::AssignToGroup("oncall".to_owned()),
        )]);

        let mut ticket = ticket("anything");
        assert!(engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "",
                tag_names: &[],
            })
            .is_none());

        ticket.priority = Priority::Urgent;
        let hit = engine
            .evaluate(&EvalInput {
                ticket: &ticket,
                first_message: "",
                tag_names: &[],
            })
            .unwrap();
        assert_eq!(hit.matched_conditions, vec!["priority:urgent".to_owned()]);
    }
}
