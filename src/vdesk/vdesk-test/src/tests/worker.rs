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

//! The per-account poll worker against a scripted mailbox.

use crate::{harness, master_key, smtp_account, FakeConnector, FakeMailboxState, Harness};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vdesk_common::{entity::EmailAccount, NoopMetrics};
use vdesk_ingest::{AccountWorker, HostLimiter};

fn spawn_worker(
    harness: &Harness,
    account: &EmailAccount,
    state: &Arc<FakeMailboxState>,
) -> (
    tokio::task::JoinHandle<()>,
    tokio::sync::watch::Sender<bool>,
) {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = AccountWorker::new(
        account.id,
        harness.store.clone(),
        harness.pipeline.clone(),
        Arc::new(FakeConnector(state.clone())),
        master_key(),
        Arc::new(HostLimiter::new(4)),
        harness.config.polling.clone(),
        harness.clock.clone(),
        Arc::new(NoopMetrics),
        shutdown_rx,
    );
    (tokio::spawn(worker.run()), shutdown_tx)
}

const MAIL_A: &str = "From: ada@customer.test\r\n\
    To: support@acme.test\r\n\
    Subject: Poll me\r\n\
    Message-ID: <poll-1@cust>\r\n\
    \r\n\
    first body\r\n";

const MAIL_B: &str = "From: ada@customer.test\r\n\
    To: support@acme.test\r\n\
    Subject: Poll me too\r\n\
    Message-ID: <poll-2@cust>\r\n\
    \r\n\
    second body\r\n";

#[test_log::test(tokio::test(start_paused = true))]
async fn a_pass_ingests_in_uid_order_and_marks_seen() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let state = FakeMailboxState::new();
    state.deliver(7, MAIL_B);
    state.deliver(3, MAIL_A);

    let (task, shutdown) = spawn_worker(&harness, &account, &state);
    // let the first pass complete.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    assert_eq!(state.seen_uids(), vec![3, 7]);
    let rows = harness.store.email_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].message_id, "poll-1@cust");
    assert_eq!(rows[1].message_id, "poll-2@cust");

    use vdesk_common::Store as _;
    let refreshed = harness
        .store
        .email_account(account.id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.last_polled_at.is_some());

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unparseable_messages_are_skipped_not_fatal() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let state = FakeMailboxState::new();
    state.deliver(1, "this is not an email at all");
    state.deliver(2, MAIL_A);

    let (task, shutdown) = spawn_worker(&harness, &account, &state);
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    // both got acked; only the parseable one produced a row.
    assert_eq!(state.seen_uids(), vec![1, 2]);
    assert_eq!(harness.store.email_rows().len(), 1);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn five_consecutive_failures_disable_the_account() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let state = FakeMailboxState::new();
    state.refuse_connections(5);

    let (task, _shutdown) = spawn_worker(&harness, &account, &state);
    // the worker retires itself after the fifth strike.
    task.await.unwrap();

    use vdesk_common::Store as _;
    let refreshed = harness
        .store
        .email_account(account.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!refreshed.imap_enabled);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn a_recovered_connection_resets_the_strike_count() {
    let harness = harness();
    let account = smtp_account("support@acme.test", &master_key());
    harness.store.seed_account(account.clone());

    let state = FakeMailboxState::new();
    state.refuse_connections(4);
    state.deliver(1, MAIL_A);

    let (task, shutdown) = spawn_worker(&harness, &account, &state);
    // four failures back off 1+2+4+8 s, then the fifth pass succeeds.
    tokio::time::sleep(std::time::Duration::from_secs(20)).await;

    assert_eq!(state.seen_uids(), vec![1]);
    use vdesk_common::Store as _;
    assert!(harness
        .store
        .email_account(account.id)
        .await
        .unwrap()
        .unwrap()
        .imap_enabled);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}
