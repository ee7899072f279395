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

//! Dedup, filter modes and attachment handling of the inbound pipeline.

use crate::{
    harness, harness_with, master_key, parsed_email, smtp_account, with_attachment,
};
use pretty_assertions::assert_eq;
use vdesk_common::{
    addr,
    entity::EmailStatus,
    testing::ScriptedGenerator,
    types::{AccountId, UserId},
    Error,
};
use vdesk_ingest::PipelineOutcome;

#[tokio::test]
async fn redelivery_of_the_same_message_id_is_idempotent() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let email = parsed_email("ada@customer.test", "Hello", "hi there", "dup-1@c");
    let first = harness.pipeline.process(&account, email).await.unwrap();
    assert!(matches!(first, PipelineOutcome::Ingested(_)));

    let replay = parsed_email("ada@customer.test", "Hello", "hi there", "dup-1@c");
    let second = harness.pipeline.process(&account, replay).await.unwrap();
    assert!(matches!(second, PipelineOutcome::Duplicate));

    // one row, one thread message.
    assert_eq!(harness.store.email_rows().len(), 1);
    let PipelineOutcome::Ingested(outcome) = first else {
        unreachable!()
    };
    assert_eq!(
        harness.manager.thread(outcome.ticket.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn filtered_mail_leaves_no_trace_by_default() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let spam = parsed_email(
        "winner2000@lottery.biz",
        "CONGRATULATIONS YOU WON",
        "free prize winner lottery claim now act now",
        "sp-9@x",
    );
    let outcome = harness.pipeline.process(&account, spam).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Filtered(_)));
    assert!(harness.store.email_rows().is_empty());
}

#[tokio::test]
async fn filtered_mail_is_kept_when_audit_logging_is_on() {
    let harness = harness_with(
        crate::config::local_test_logging_filtered(),
        ScriptedGenerator::canned(),
    );
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let spam = parsed_email(
        "winner2000@lottery.biz",
        "CONGRATULATIONS YOU WON",
        "free prize winner lottery claim now act now",
        "sp-10@x",
    );
    harness.pipeline.process(&account, spam).await.unwrap();

    let rows = harness.store.email_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, EmailStatus::Filtered);
    assert_eq!(rows[0].ticket_id, None);
}

#[tokio::test]
async fn registered_senders_are_never_filtered() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());
    harness
        .store
        .seed_user(UserId::new(), addr!("shouty@customer.test"));

    let shouting = parsed_email(
        "shouty@customer.test",
        "WHERE IS MY ORDER",
        "free prize winner lottery claim now act now",
        "ham-1@c",
    );
    let outcome = harness.pipeline.process(&account, shouting).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Ingested(_)));
}

#[tokio::test]
async fn promotions_pass_through_when_their_filter_is_off() {
    let mut config = crate::config::local_test();
    config.filter.filter_promotions = false;
    let harness = harness_with(config, ScriptedGenerator::canned());
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let mut newsletter = parsed_email(
        "news@shop.test",
        "Weekly deals: sale discount coupon",
        "exclusive offers, unsubscribe anytime",
        "nl-1@shop",
    );
    newsletter.has_list_unsubscribe = true;

    let outcome = harness.pipeline.process(&account, newsletter).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Ingested(_)));
}

#[tokio::test]
async fn attachments_are_stored_and_bad_parts_skipped() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let email = with_attachment(
        with_attachment(
            parsed_email("ada@customer.test", "Logs", "see attached", "att-1@c"),
            "trace.txt",
            "text/plain",
            b"panic at line 42",
        ),
        "virus.exe",
        "application/x-msdownload",
        b"MZ",
    );

    let outcome = harness.pipeline.process(&account, email).await.unwrap();
    let PipelineOutcome::Ingested(outcome) = outcome else {
        panic!("expected ingestion");
    };

    // the allowed part landed, the refused one was skipped, not fatal.
    assert_eq!(harness.blob.len(), 1);
    use vdesk_common::Store as _;
    let stored = harness
        .store
        .attachments(outcome.ticket.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].file_name, "trace.txt");
    assert!(harness.store.email_rows()[0].has_attachments);
}

#[tokio::test]
async fn webhook_ingress_joins_the_same_pipeline() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let outcome = harness
        .pipeline
        .ingest_webhook(
            account.id,
            parsed_email("ada@customer.test", "Via webhook", "hi", "wh-1@c"),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Ingested(_)));

    assert!(matches!(
        harness
            .pipeline
            .ingest_webhook(
                AccountId::new(),
                parsed_email("ada@customer.test", "Nope", "hi", "wh-2@c"),
            )
            .await,
        Err(Error::NotFound { .. })
    ));
}
