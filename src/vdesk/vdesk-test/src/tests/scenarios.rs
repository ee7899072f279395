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

//! End-to-end conversation scenarios, driven the way the HTTP edge and the
//! poller drive the core.

use crate::{harness, harness_with, keyword_rule, parsed_email, smtp_account, web_request};
use pretty_assertions::assert_eq;
use vdesk_ai::AiOutcome;
use vdesk_common::{
    entity::{MessageSender, Priority, RuleAction, TicketSource, TicketStatus},
    testing::ScriptedGenerator,
    types::UserId,
};
use vdesk_ingest::PipelineOutcome;

#[tokio::test(flavor = "multi_thread")]
async fn new_web_ticket_gets_an_ai_reply() {
    let harness = harness();
    let user = UserId::new();

    let outcome = harness
        .manager
        .ingest_customer_message(web_request("acme", "Password reset", "Hi", user))
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.ticket.status, TicketStatus::Open);
    assert_eq!(outcome.ticket.priority, Priority::Medium);
    assert_eq!(outcome.ticket.source, TicketSource::Web);

    let trigger = outcome.ai_trigger.expect("open unassigned web ticket");
    let reply = match harness.coordinator.handle_trigger(trigger).await.unwrap() {
        AiOutcome::Replied(reply) => reply,
        other => panic!("expected a committed reply, got {other}"),
    };
    assert_eq!(reply.success, Some(true));
    assert!(reply.confidence.is_some());

    let thread = harness.manager.thread(outcome.ticket.id).await.unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].sender, MessageSender::Customer);
    assert_eq!(thread[0].message, "Hi");
    assert_eq!(thread[1].sender, MessageSender::Ai);
    // sanitizer ran: no address-shaped text survives.
    assert!(!thread[1].message.contains('@'));
}

#[tokio::test(flavor = "multi_thread")]
async fn third_trigger_in_the_window_is_rate_limited() {
    let harness = harness();
    let user = UserId::new();

    let first = harness
        .manager
        .ingest_customer_message(web_request("acme", "Rate", "one", user))
        .await
        .unwrap();
    let ticket = first.ticket.id;
    assert!(matches!(
        harness
            .coordinator
            .handle_trigger(first.ai_trigger.unwrap())
            .await
            .unwrap(),
        AiOutcome::Replied(_)
    ));

    let second = harness
        .manager
        .reply_as_customer(ticket, user, "again")
        .await
        .unwrap();
    assert!(matches!(
        harness
            .coordinator
            .handle_trigger(second.ai_trigger.unwrap())
            .await
            .unwrap(),
        AiOutcome::Replied(_)
    ));

    // the window (60 s, max 2) is now full.
    let third = harness
        .manager
        .reply_as_customer(ticket, user, "and again")
        .await
        .unwrap();
    assert_eq!(
        harness
            .coordinator
            .handle_trigger(third.ai_trigger.unwrap())
            .await
            .unwrap(),
        AiOutcome::RateLimited
    );

    let thread = harness.manager.thread(ticket).await.unwrap();
    let count = |sender: MessageSender| thread.iter().filter(|m| m.sender == sender).count();
    assert_eq!(count(MessageSender::Customer), 3);
    assert_eq!(count(MessageSender::Ai), 2);
    // the suppression note is on by default.
    assert_eq!(count(MessageSender::System), 1);
    assert_eq!(thread.len(), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn human_takeover_discards_the_racing_ai_reply() {
    let harness = harness_with(
        crate::config::local_test(),
        ScriptedGenerator::canned().with_delay(std::time::Duration::from_millis(80)),
    );
    let user = UserId::new();

    let outcome = harness
        .manager
        .ingest_customer_message(web_request("acme", "Race", "help me", user))
        .await
        .unwrap();
    let ticket = outcome.ticket.id;
    let trigger = outcome.ai_trigger.unwrap();

    let coordinator = harness.coordinator.clone();
    let generation = tokio::spawn(async move { coordinator.handle_trigger(trigger).await });

    // let the generation start, then the admin takes over.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.manager.escalate(ticket).await.unwrap();

    assert_eq!(generation.await.unwrap().unwrap(), AiOutcome::Discarded);

    let thread = harness.manager.thread(ticket).await.unwrap();
    assert!(thread.iter().all(|m| m.sender != MessageSender::Ai));
    assert_eq!(thread.last().unwrap().sender, MessageSender::System);
    assert!(thread.last().unwrap().message.contains("Escalated"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_triggers_on_one_ticket_are_single_flight() {
    let harness = harness_with(
        crate::config::local_test(),
        ScriptedGenerator::canned().with_delay(std::time::Duration::from_millis(30)),
    );
    let user = UserId::new();

    let first = harness
        .manager
        .ingest_customer_message(web_request("acme", "Flight", "one", user))
        .await
        .unwrap();
    let ticket = first.ticket.id;
    let second = harness
        .manager
        .reply_as_customer(ticket, user, "two")
        .await
        .unwrap();

    // both triggers race; the flights lock serializes the generations.
    let (left, right) = tokio::join!(
        harness.coordinator.handle_trigger(first.ai_trigger.unwrap()),
        harness.coordinator.handle_trigger(second.ai_trigger.unwrap()),
    );
    assert!(matches!(left.unwrap(), AiOutcome::Replied(_)));
    assert!(matches!(right.unwrap(), AiOutcome::Replied(_)));

    let thread = harness.manager.thread(ticket).await.unwrap();
    let ai_stamps = thread
        .iter()
        .filter(|m| m.sender == MessageSender::Ai)
        .map(|m| m.created_at)
        .collect::<Vec<_>>();
    // exactly two commits, strictly ordered, never interleaved.
    assert_eq!(ai_stamps.len(), 2);
    assert!(ai_stamps[0] < ai_stamps[1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn inbound_reply_threads_into_the_referenced_ticket() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &crate::master_key());
    harness.store.seed_account(account.clone());

    let first = harness
        .pipeline
        .process(
            &account,
            parsed_email("ada@customer.test", "Broken export", "It fails", "m-1@acme"),
        )
        .await
        .unwrap();
    let PipelineOutcome::Ingested(first) = first else {
        panic!("expected ingestion");
    };
    assert!(first.created);

    let mut reply = parsed_email(
        "ada@customer.test",
        "Re: Broken export",
        "Still failing today",
        "m-2@acme",
    );
    reply.in_reply_to = Some("m-1@acme".to_owned());

    let second = harness.pipeline.process(&account, reply).await.unwrap();
    let PipelineOutcome::Ingested(second) = second else {
        panic!("expected ingestion");
    };
    assert!(!second.created, "no new ticket for a threaded reply");
    assert_eq!(second.ticket.id, first.ticket.id);

    let thread = harness.manager.thread(first.ticket.id).await.unwrap();
    assert_eq!(thread.len(), 2);
    assert!(thread[1].message.contains("Still failing"));

    let rows = harness.store.email_rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.ticket_id == Some(first.ticket.id)));
}

#[tokio::test(flavor = "multi_thread")]
async fn spam_verdict_is_overridden_for_ticket_replies() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &crate::master_key());
    harness.store.seed_account(account.clone());

    let opening = harness
        .pipeline
        .process(
            &account,
            parsed_email("ada@customer.test", "My order", "Where is it?", "t3-1@acme"),
        )
        .await
        .unwrap();
    let PipelineOutcome::Ingested(opening) = opening else {
        panic!("expected ingestion");
    };

    let spammy_body = "winner prize free lottery claim act now guarantee no risk";

    // control: the same content without the reply binding is filtered.
    let standalone = harness
        .pipeline
        .process(
            &account,
            parsed_email("spammer@x.biz", "CONGRATULATIONS YOU WON", spammy_body, "sp-1@x"),
        )
        .await
        .unwrap();
    assert!(matches!(standalone, PipelineOutcome::Filtered(_)));

    // the reply exception wins over the verdict.
    let mut reply = parsed_email(
        "spammer@x.biz",
        "CONGRATULATIONS YOU WON",
        spammy_body,
        "sp-2@x",
    );
    reply.in_reply_to = Some("t3-1@acme".to_owned());
    let threaded = harness.pipeline.process(&account, reply).await.unwrap();
    let PipelineOutcome::Ingested(threaded) = threaded else {
        panic!("reply exception must override the verdict");
    };
    assert_eq!(threaded.ticket.id, opening.ticket.id);

    let thread = harness.manager.thread(opening.ticket.id).await.unwrap();
    assert_eq!(thread.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn routing_applies_the_first_match_only() {
    let harness = harness();
    harness.store.seed_rule(keyword_rule(
        "tag-billing",
        5,
        "refund",
        RuleAction::AddTag("billing".to_owned()),
    ));
    let winner = keyword_rule(
        "escalate-refunds",
        10,
        "refund",
        RuleAction::SetPriority(Priority::High),
    );
    let winner_id = winner.id;
    harness.store.seed_rule(winner);

    let outcome = harness
        .manager
        .ingest_customer_message(web_request(
            "acme",
            "Refund please",
            "I want my money back",
            UserId::new(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.ticket.priority, Priority::High);

    let logs = harness.store.routing_log_rows();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].rule_id, winner_id);
    assert_eq!(logs[0].ticket_id, outcome.ticket.id);
    assert_eq!(logs[0].matched_conditions, vec!["keyword:refund".to_owned()]);

    // the lower-priority rule never fired.
    use vdesk_common::Store as _;
    let tags = harness.store.ticket_tags(outcome.ticket.id).await.unwrap();
    assert!(tags.is_empty());
}
