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

//! Boot-time assembly and the long-running task supervisor. Request
//! handlers never spawn background work; every periodic or queued job
//! lives in one of the tasks started here.

use crate::scheduler::{self, Emitter, Receiver};
use std::collections::HashMap;
use tokio_stream::StreamExt;
use vdesk_ai::AiCoordinator;
use vdesk_classifier::{BayesModel, Classifier, Thresholds};
use vdesk_common::{
    types::AccountId, BlobStore, Clock, Metrics, RandomSource, Store, TextGenerator,
};
use vdesk_config::{Config, SLA_SCAN_INTERVAL};
use vdesk_delivery::{Dispatcher, StandardProviderFactory};
use vdesk_ingest::{AccountWorker, HostLimiter, IngestPipeline, MailboxConnector};
use vdesk_seal::MasterKey;
use vdesk_sla::SlaTracker;
use vdesk_ticket::{AttachmentCoordinator, TicketStateManager, TrashPurger};

/// capacity of the trigger channel between ingestion and the coordinator.
const AI_CHANNEL_SIZE: usize = 256;

/// The external collaborators, injected once at boot. No global mutable
/// state anywhere: every component receives what it needs from here.
pub struct Services<S> {
    ///
    pub store: std::sync::Arc<S>,
    /// blob backend; pass [`vdesk_common::DisabledBlob`] when unset.
    pub blob: std::sync::Arc<dyn BlobStore>,
    /// whether the blob backend is real (attachments enabled).
    pub attachments_enabled: bool,
    /// the LLM vendor; `None` disables AI replies entirely.
    pub generator: Option<std::sync::Arc<dyn TextGenerator>>,
    ///
    pub connector: std::sync::Arc<dyn MailboxConnector>,
    ///
    pub clock: std::sync::Arc<dyn Clock>,
    ///
    pub random: std::sync::Arc<dyn RandomSource>,
    ///
    pub metrics: std::sync::Arc<dyn Metrics>,
}

/// The assembled conversation core, handed to the HTTP edge.
pub struct Core<S> {
    ///
    pub config: std::sync::Arc<Config>,
    ///
    pub manager: std::sync::Arc<TicketStateManager<S>>,
    ///
    pub sla: std::sync::Arc<SlaTracker<S>>,
    ///
    pub attachments: std::sync::Arc<AttachmentCoordinator<S>>,
    ///
    pub pipeline: std::sync::Arc<IngestPipeline<S>>,
    ///
    pub dispatcher: std::sync::Arc<Dispatcher<S>>,
    ///
    pub purger: std::sync::Arc<TrashPurger<S>>,
    /// present iff a generator was injected.
    pub coordinator: Option<std::sync::Arc<AiCoordinator<S>>>,
    /// where the edge publishes AI triggers for web/API tickets.
    pub emitter: std::sync::Arc<Emitter>,

    store: std::sync::Arc<S>,
    connector: std::sync::Arc<dyn MailboxConnector>,
    clock: std::sync::Arc<dyn Clock>,
    metrics: std::sync::Arc<dyn Metrics>,
    master: MasterKey,
}

impl<S: Store + 'static> Core<S> {
    /// Wire every component from the configuration and the injected
    /// services. Returns the core plus the trigger receiver the
    /// supervisor's AI task consumes.
    #[must_use]
    pub fn assemble(config: std::sync::Arc<Config>, services: Services<S>) -> (Self, Receiver) {
        let Services {
            store,
            blob,
            attachments_enabled,
            generator,
            connector,
            clock,
            random,
            metrics,
        } = services;

        let master = MasterKey::derive(&config.secrets.master_encryption_key);
        let (emitter, receiver) = scheduler::init(AI_CHANNEL_SIZE);

        let manager = std::sync::Arc::new(TicketStateManager::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let sla = std::sync::Arc::new(SlaTracker::new(store.clone(), clock.clone()));
        let attachments = std::sync::Arc::new(AttachmentCoordinator::new(
            store.clone(),
            blob,
            clock.clone(),
            config.attachments.clone(),
        ));
        let purger = std::sync::Arc::new(TrashPurger::new(
            store.clone(),
            attachments.clone(),
            clock.clone(),
        ));

        let thresholds = Thresholds {
            spam: config.filter.spam_threshold,
            promotion: config.filter.promotion_threshold,
        };
        let classifier = match (config.filter.ml_enabled, &config.filter.ml_model_path) {
            (true, Some(path)) => match BayesModel::load(path) {
                Ok(model) => Classifier::with_model(thresholds, model),
                Err(error) => {
                    tracing::warn!(%error, "Spam model unusable, falling back to rules.");
                    Classifier::new(thresholds)
                }
            },
            _ => Classifier::new(thresholds),
        };

        let pipeline = std::sync::Arc::new(IngestPipeline::new(
            store.clone(),
            manager.clone(),
            attachments_enabled.then(|| attachments.clone()),
            classifier,
            config.filter.clone(),
            clock.clone(),
            metrics.clone(),
            generator.as_ref().map(|_| emitter.ai_sender()),
        ));

        let dispatcher = std::sync::Arc::new(Dispatcher::new(
            store.clone(),
            clock.clone(),
            random.clone(),
            master.clone(),
            config.delivery.clone(),
            Box::new(StandardProviderFactory),
        ));

        let coordinator = generator.map(|generator| {
            std::sync::Arc::new(AiCoordinator::new(
                manager.clone(),
                generator,
                clock.clone(),
                random,
                metrics.clone(),
                config.ai.clone(),
            ))
        });

        (
            Self {
                config,
                manager,
                sla,
                attachments,
                pipeline,
                dispatcher,
                purger,
                coordinator,
                emitter,
                store,
                connector,
                clock,
                metrics,
                master,
            },
            receiver,
        )
    }
}

/// Handle over the background tasks; dropping it does not stop them, call
/// [`Supervisor::stop`].
pub struct Supervisor {
    shutdown: tokio::sync::watch::Sender<bool>,
    tasks: Vec<(&'static str, tokio::task::JoinHandle<()>)>,
    drain: std::time::Duration,
}

impl Supervisor {
    /// Start every long-running task: the AI trigger consumer, the poller
    /// pool reconciler, the SLA minute scan and the trash reaper.
    #[must_use]
    pub fn start<S: Store + 'static>(core: &Core<S>, mut receiver: Receiver) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let mut tasks: Vec<(&'static str, tokio::task::JoinHandle<()>)> = Vec::new();

        if let Some(coordinator) = core.coordinator.clone() {
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "ai-coordinator",
                tokio::spawn(async move {
                    let triggers = receiver.as_stream();
                    tokio::pin!(triggers);
                    loop {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                            trigger = triggers.next() => {
                                let Some(trigger) = trigger else { break };
                                let coordinator = coordinator.clone();
                                tokio::spawn(async move {
                                    if let Err(error) = coordinator.handle_trigger(trigger).await {
                                        tracing::warn!(%error, "AI trigger processing failed.");
                                    }
                                });
                            }
                        }
                    }
                    tracing::debug!("AI coordinator task stopped.");
                }),
            ));
        } else {
            tracing::info!("No text generator configured, AI replies disabled.");
        }

        if core.config.polling.enabled {
            tasks.push((
                "poller-pool",
                tokio::spawn(poller_pool(
                    core.store.clone(),
                    core.pipeline.clone(),
                    core.connector.clone(),
                    core.master.clone(),
                    core.config.clone(),
                    core.clock.clone(),
                    core.metrics.clone(),
                    shutdown_rx.clone(),
                )),
            ));
        } else {
            tracing::info!("Inbound email polling disabled by configuration.");
        }

        {
            let sla = core.sla.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "sla-scanner",
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(SLA_SCAN_INTERVAL);
                    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = tick.tick() => {
                                if let Err(error) = sla.scan_once().await {
                                    tracing::error!(%error, "SLA scan pass failed.");
                                }
                            }
                        }
                    }
                }),
            ));
        }

        {
            let purger = core.purger.clone();
            let retention_days = core.config.retention.days;
            let sweep = core.config.retention.sweep_interval;
            let mut shutdown = shutdown_rx;
            tasks.push((
                "trash-reaper",
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(sweep);
                    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = tick.tick() => {
                                match purger.reap_once(retention_days).await {
                                    Ok(report) if !report.is_clean() => {
                                        tracing::warn!(
                                            failed = report.failed.len(),
                                            "Some trash survived the reaper, retrying next tick."
                                        );
                                    }
                                    Ok(_) => {}
                                    Err(error) => {
                                        tracing::error!(%error, "Trash reap pass failed.");
                                    }
                                }
                            }
                        }
                    }
                }),
            ));
        }

        Self {
            shutdown: shutdown_tx,
            tasks,
            drain: core.config.shutdown.drain,
        }
    }

    /// Signal every task and wait up to the drain deadline; stragglers are
    /// aborted.
    pub async fn stop(self) {
        tracing::info!("Supervisor stopping.");
        let _ignored = self.shutdown.send(true);

        for (name, task) in self.tasks {
            match tokio::time::timeout(self.drain, task).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task drained."),
                Ok(Err(error)) => tracing::warn!(task = name, %error, "Task panicked."),
                Err(_) => {
                    tracing::warn!(task = name, "Task missed the drain deadline, aborted.");
                }
            }
        }
    }
}

/// Reconcile one worker per pollable account with the account table, at
/// the configured cadence.
#[allow(clippy::too_many_arguments)]
async fn poller_pool<S: Store + 'static>(
    store: std::sync::Arc<S>,
    pipeline: std::sync::Arc<IngestPipeline<S>>,
    connector: std::sync::Arc<dyn MailboxConnector>,
    master: MasterKey,
    config: std::sync::Arc<Config>,
    clock: std::sync::Arc<dyn Clock>,
    metrics: std::sync::Arc<dyn Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let limiter = std::sync::Arc::new(HostLimiter::new(
        config.polling.max_connections_per_host,
    ));
    let mut workers: HashMap<AccountId, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut tick = tokio::time::interval(config.polling.reconcile_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {}
        }

        workers.retain(|account_id, handle| {
            if handle.is_finished() {
                tracing::debug!(account = %account_id, "Poll worker finished.");
                false
            } else {
                true
            }
        });

        let accounts = match store.email_accounts().await {
            Ok(accounts) => accounts,
            Err(error) => {
                tracing::error!(%error, "Cannot list accounts for the poller pool.");
                continue;
            }
        };

        for account in accounts {
            if !account.wants_polling() || workers.contains_key(&account.id) {
                continue;
            }
            tracing::info!(account = %account.address, "Starting poll worker.");
            let worker = AccountWorker::new(
                account.id,
                store.clone(),
                pipeline.clone(),
                connector.clone(),
                master.clone(),
                limiter.clone(),
                config.polling.clone(),
                clock.clone(),
                metrics.clone(),
                shutdown.clone(),
            );
            workers.insert(account.id, tokio::spawn(worker.run()));
        }

        metrics.gauge("poller.workers", workers.len() as f64);
    }

    // workers watch the same shutdown channel; they stop on their own.
    tracing::debug!("Poller pool stopped.");
}
