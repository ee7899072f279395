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

//! State machine, bulk trash operations and thread ordering.

use crate::{harness, web_request};
use pretty_assertions::assert_eq;
use vdesk_common::{
    addr,
    entity::{MessageSender, TicketStatus},
    types::{TicketId, UserId},
    Error, Requester,
};

#[tokio::test]
async fn thread_timestamps_strictly_increase() {
    let harness = harness();
    let user = UserId::new();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Order", "first", user))
        .await
        .unwrap()
        .ticket
        .id;

    harness
        .manager
        .reply_as_customer(ticket, user, "second")
        .await
        .unwrap();
    harness
        .manager
        .append_admin_reply(ticket, &addr!("bob@acme.test"), "third")
        .await
        .unwrap();
    harness
        .manager
        .append_system_note(ticket, "fourth")
        .await
        .unwrap();

    let thread = harness.manager.thread(ticket).await.unwrap();
    assert_eq!(thread.len(), 4);
    for pair in thread.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }
    assert!(thread[0].may_open_thread());
}

#[tokio::test]
async fn continuation_reuses_the_open_ticket() {
    let harness = harness();
    let user = UserId::new();

    let first = harness
        .manager
        .ingest_customer_message(web_request("acme", "Same subject", "a", user))
        .await
        .unwrap();
    let second = harness
        .manager
        .ingest_customer_message(web_request("acme", "Same subject", "b", user))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.ticket.id, second.ticket.id);

    // a closed ticket stops matching; the next message opens a new one.
    harness.manager.close_ticket(first.ticket.id).await.unwrap();
    let third = harness
        .manager
        .ingest_customer_message(web_request("acme", "Same subject", "c", user))
        .await
        .unwrap();
    assert!(third.created);
    assert_ne!(third.ticket.id, first.ticket.id);
}

#[tokio::test]
async fn assignment_is_idempotent_and_blocks_ai() {
    let harness = harness();
    let outcome = harness
        .manager
        .ingest_customer_message(web_request("acme", "Assign", "x", UserId::new()))
        .await
        .unwrap();
    let ticket = outcome.ticket.id;
    let agent = addr!("agent@acme.test");

    let assigned = harness
        .manager
        .assign_to_admin(ticket, agent.clone())
        .await
        .unwrap();
    assert_eq!(assigned.status, TicketStatus::HumanAssigned);

    // same admin again: no second takeover note.
    harness
        .manager
        .assign_to_admin(ticket, agent.clone())
        .await
        .unwrap();
    let notes = harness
        .manager
        .thread(ticket)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.sender == MessageSender::System)
        .count();
    assert_eq!(notes, 1);

    assert!(matches!(
        harness
            .manager
            .append_ai_reply(ticket, "late reply", 0.9, true)
            .await,
        Err(Error::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn closing_stamps_resolved_at_and_is_idempotent() {
    let harness = harness();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Close", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    let closed = harness.manager.close_ticket(ticket).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    let resolved_at = closed.resolved_at.unwrap();

    // closing twice keeps the first resolution time.
    let again = harness.manager.close_ticket(ticket).await.unwrap();
    assert_eq!(again.resolved_at, Some(resolved_at));
}

#[tokio::test]
async fn reply_ownership_and_closed_tickets_are_enforced() {
    let harness = harness();
    let owner = UserId::new();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Mine", "x", owner))
        .await
        .unwrap()
        .ticket
        .id;

    assert!(matches!(
        harness
            .manager
            .reply_as_customer(ticket, UserId::new(), "not mine")
            .await,
        Err(Error::Forbidden(_))
    ));

    harness.manager.close_ticket(ticket).await.unwrap();
    assert!(matches!(
        harness.manager.reply_as_customer(ticket, owner, "too late").await,
        Err(Error::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn soft_delete_is_all_or_nothing() {
    let harness = harness();
    let user = UserId::new();
    let closed = harness
        .manager
        .ingest_customer_message(web_request("acme", "One", "x", user))
        .await
        .unwrap()
        .ticket
        .id;
    harness.manager.close_ticket(closed).await.unwrap();

    let still_open = harness
        .manager
        .ingest_customer_message(web_request("acme", "Two", "y", user))
        .await
        .unwrap()
        .ticket
        .id;

    let result = harness.manager.soft_delete(&[closed, still_open]).await;
    assert!(matches!(result, Err(Error::InvalidTransition(_))));

    // nothing was written: the closed one is still visible.
    assert!(!harness.manager.ticket(closed).await.unwrap().is_deleted);
    assert!(harness.manager.trash().await.unwrap().is_empty());
}

#[tokio::test]
async fn soft_delete_then_restore_round_trips() {
    let harness = harness();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Trash me", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;
    harness.manager.close_ticket(ticket).await.unwrap();
    let before = harness.manager.ticket(ticket).await.unwrap();

    harness.manager.soft_delete(&[ticket]).await.unwrap();
    // trashed tickets are hidden from the live lookup.
    assert!(matches!(
        harness.manager.ticket(ticket).await,
        Err(Error::NotFound { .. })
    ));
    assert_eq!(harness.manager.trash().await.unwrap().len(), 1);

    harness.manager.restore(&[ticket]).await.unwrap();
    let after = harness.manager.ticket(ticket).await.unwrap();

    assert!(!after.is_deleted);
    assert_eq!(after.deleted_at, None);
    assert_eq!(after.status, before.status);
    assert_eq!(after.subject, before.subject);
    assert_eq!(after.resolved_at, before.resolved_at);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn unknown_ids_fail_the_whole_batch() {
    let harness = harness();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Known", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;
    harness.manager.close_ticket(ticket).await.unwrap();

    let result = harness
        .manager
        .soft_delete(&[ticket, TicketId::new()])
        .await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
    assert!(!harness.manager.ticket(ticket).await.unwrap().is_deleted);
}

#[tokio::test]
async fn hard_delete_removes_rows_and_blobs() {
    let harness = harness();
    let outcome = harness
        .manager
        .ingest_customer_message(web_request("acme", "Purge", "x", UserId::new()))
        .await
        .unwrap();
    let ticket = outcome.ticket.id;

    harness
        .attachments
        .upload(
            ticket,
            Some(outcome.message.id),
            "log.txt",
            "text/plain",
            &Requester::System,
            b"boom".as_slice(),
        )
        .await
        .unwrap();
    assert_eq!(harness.blob.len(), 1);

    harness.manager.close_ticket(ticket).await.unwrap();
    harness.manager.soft_delete(&[ticket]).await.unwrap();

    let report = harness.purger.hard_delete(&[ticket]).await;
    assert!(report.is_clean());
    assert_eq!(report.purged, vec![ticket]);

    assert!(harness.blob.is_empty());
    use vdesk_common::Store as _;
    assert!(harness.store.ticket(ticket).await.unwrap().is_none());
    assert!(harness.store.messages(ticket).await.unwrap().is_empty());
}

#[tokio::test]
async fn live_tickets_refuse_hard_deletion() {
    let harness = harness();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Alive", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    let report = harness.purger.hard_delete(&[ticket]).await;
    assert_eq!(report.failed.len(), 1);
    assert!(harness.manager.ticket(ticket).await.is_ok());
}

#[tokio::test]
async fn reaper_honors_the_retention_window() {
    let harness = harness();
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Old", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;
    harness.manager.close_ticket(ticket).await.unwrap();
    harness.manager.soft_delete(&[ticket]).await.unwrap();

    harness
        .clock
        .advance(std::time::Duration::from_secs(29 * 24 * 3600));
    let early = harness.purger.reap_once(30).await.unwrap();
    assert!(early.purged.is_empty());

    harness
        .clock
        .advance(std::time::Duration::from_secs(2 * 24 * 3600));
    let due = harness.purger.reap_once(30).await.unwrap();
    assert_eq!(due.purged, vec![ticket]);
}
