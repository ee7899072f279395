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

//! Wiring smoke tests: the assembled core runs and drains cleanly.

use crate::{web_request, FakeConnector, FakeMailboxState};
use std::sync::Arc;
use vdesk_common::{
    entity::MessageSender,
    testing::{ManualClock, MemoryBlob, MemoryStore, ScriptedGenerator},
    types::UserId,
    NoopMetrics, SystemRandom,
};
use vdesk_server::{Core, Services, Supervisor};

fn assembled() -> (Core<MemoryStore>, vdesk_server::scheduler::Receiver) {
    Core::assemble(
        Arc::new(crate::config::local_test()),
        Services {
            store: Arc::new(MemoryStore::new()),
            blob: Arc::new(MemoryBlob::new()),
            attachments_enabled: true,
            generator: Some(Arc::new(ScriptedGenerator::canned())),
            connector: Arc::new(FakeConnector(FakeMailboxState::new())),
            clock: Arc::new(ManualClock::default()),
            random: Arc::new(SystemRandom),
            metrics: Arc::new(NoopMetrics),
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn the_supervisor_starts_and_drains() {
    let (core, receiver) = assembled();
    let supervisor = Supervisor::start(&core, receiver);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    supervisor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn edge_published_triggers_reach_the_coordinator() {
    let (core, receiver) = assembled();
    let supervisor = Supervisor::start(&core, receiver);

    let outcome = core
        .manager
        .ingest_customer_message(web_request("acme", "Wired", "hello", UserId::new()))
        .await
        .unwrap();
    core.emitter
        .send_to_ai(outcome.ai_trigger.unwrap())
        .await
        .unwrap();

    // the coordinator task commits the reply in the background.
    let mut replied = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let thread = core.manager.thread(outcome.ticket.id).await.unwrap();
        if thread.iter().any(|m| m.sender == MessageSender::Ai) {
            replied = true;
            break;
        }
    }
    assert!(replied, "AI reply never landed");

    supervisor.stop().await;
}
