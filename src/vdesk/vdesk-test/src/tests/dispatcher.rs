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

//! Outbound dispatch: account selection, threading, templates, retries.

use crate::{
    fake_dispatcher, harness, master_key, parsed_email, send_request, smtp_account, web_request,
};
use pretty_assertions::assert_eq;
use vdesk_common::{
    entity::{EmailStatus, EmailTemplate},
    types::{TemplateId, UserId},
    Error,
};
use vdesk_delivery::SendError;
use vdesk_ingest::PipelineOutcome;

#[tokio::test]
async fn sends_through_the_default_account_and_stores_the_row() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Outbound", "hi", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    let row = dispatcher
        .send_from_ticket(
            ticket,
            send_request("ada@customer.test", "Re: Outbound", "All sorted."),
            None,
        )
        .await
        .unwrap();

    assert_eq!(row.status, EmailStatus::Sent);
    assert!(row.sent_at.is_some());
    assert_eq!(row.from, account.address);
    assert!(row.message_id.ends_with("@acme.test"));

    assert_eq!(provider.sent_count(), 1);
    let envelope = provider.last_envelope().unwrap();
    assert_eq!(envelope.subject, "Re: Outbound");
    assert_eq!(envelope.message_id, row.message_id);
}

#[tokio::test]
async fn replies_thread_onto_the_latest_inbound_email() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let inbound = harness
        .pipeline
        .process(
            &account,
            parsed_email("ada@customer.test", "Thread me", "first mail", "in-1@cust"),
        )
        .await
        .unwrap();
    let PipelineOutcome::Ingested(inbound) = inbound else {
        panic!("expected ingestion");
    };

    dispatcher
        .send_from_ticket(
            inbound.ticket.id,
            send_request("ada@customer.test", "Re: Thread me", "answer"),
            None,
        )
        .await
        .unwrap();

    let envelope = provider.last_envelope().unwrap();
    assert_eq!(envelope.threading.in_reply_to.as_deref(), Some("in-1@cust"));
    assert!(envelope
        .threading
        .references
        .contains(&"in-1@cust".to_owned()));
}

#[tokio::test]
async fn templates_substitute_the_known_variables() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account);

    let user = UserId::new();
    harness
        .store
        .seed_user(user, vdesk_common::addr!("ada@customer.test"));
    let template = EmailTemplate {
        id: TemplateId::new(),
        name: "ack".to_owned(),
        subject: "[{{ticket_id}}] {{subject}}".to_owned(),
        body_text: "Hi {{customer_name}}, {{admin_name}} here: {{message}}".to_owned(),
        body_html: None,
    };
    harness.store.seed_template(template.clone());

    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Printer on fire", "help", user))
        .await
        .unwrap()
        .ticket
        .id;

    let mut request = send_request("ada@customer.test", "ignored", "we are on it");
    request.template_id = Some(template.id);
    request.admin_name = Some("Bob".to_owned());
    dispatcher
        .send_from_ticket(ticket, request, None)
        .await
        .unwrap();

    let envelope = provider.last_envelope().unwrap();
    assert_eq!(envelope.subject, format!("[{ticket}] Printer on fire"));
    assert_eq!(envelope.body_text, "Hi ada, Bob here: we are on it");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    harness
        .store
        .seed_account(smtp_account("support@acme.test", &master_key()));
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Retry", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    provider.fail_next(SendError::Transient("450 try later".to_owned()));
    provider.fail_next(SendError::Transient("greylisted".to_owned()));

    let row = dispatcher
        .send_from_ticket(ticket, send_request("a@b.test", "s", "b"), None)
        .await
        .unwrap();
    assert_eq!(row.status, EmailStatus::Sent);
    assert_eq!(provider.sent_count(), 1);
}

#[tokio::test]
async fn permanent_failures_store_a_failed_row() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    harness
        .store
        .seed_account(smtp_account("support@acme.test", &master_key()));
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Fail", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    provider.fail_next(SendError::Permanent("535 bad credentials".to_owned()));

    let result = dispatcher
        .send_from_ticket(ticket, send_request("a@b.test", "s", "b"), None)
        .await;
    assert!(matches!(result, Err(Error::Permanent(_))));
    assert_eq!(provider.sent_count(), 0);

    let rows = harness.store.email_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, EmailStatus::Failed);
    assert!(rows[0].error_message.as_deref().unwrap().contains("535"));
}

#[tokio::test]
async fn without_any_account_the_send_is_refused() {
    let harness = harness();
    let (dispatcher, _provider) = fake_dispatcher(&harness);
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Nobody", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    assert!(matches!(
        dispatcher
            .send_from_ticket(ticket, send_request("a@b.test", "s", "b"), None)
            .await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn an_explicit_sender_account_wins_over_the_default() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);

    let default_account = smtp_account("support@acme.test", &master_key());
    let mut branded = smtp_account("billing@acme.test", &master_key());
    branded.is_default = false;
    harness.store.seed_account(default_account);
    harness.store.seed_account(branded.clone());

    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Explicit", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    dispatcher
        .send_from_ticket(
            ticket,
            send_request("a@b.test", "s", "b"),
            Some(branded.id),
        )
        .await
        .unwrap();
    assert_eq!(provider.last_envelope().unwrap().from, branded.address);
}

#[tokio::test]
async fn identical_template_sends_render_identical_bodies() {
    let harness = harness();
    let (dispatcher, provider) = fake_dispatcher(&harness);
    harness
        .store
        .seed_account(smtp_account("support@acme.test", &master_key()));
    let template = EmailTemplate {
        id: TemplateId::new(),
        name: "same".to_owned(),
        subject: "{{subject}}".to_owned(),
        body_text: "{{message}}".to_owned(),
        body_html: None,
    };
    harness.store.seed_template(template.clone());
    let ticket = harness
        .manager
        .ingest_customer_message(web_request("acme", "Twice", "x", UserId::new()))
        .await
        .unwrap()
        .ticket
        .id;

    let mut request = send_request("a@b.test", "s", "stable body");
    request.template_id = Some(template.id);
    dispatcher
        .send_from_ticket(ticket, request.clone(), None)
        .await
        .unwrap();
    dispatcher
        .send_from_ticket(ticket, request, None)
        .await
        .unwrap();

    let sent = provider.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].body_text, sent[1].body_text);
    // two distinct rows with two distinct message ids.
    assert_ne!(sent[0].message_id, sent[1].message_id);
    assert_eq!(harness.store.email_rows().len(), 2);
}
