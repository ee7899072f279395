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

//! vDesk executable: config load, log setup, core assembly. The datastore
//! and the LLM vendor are deployment integrations linked by the embedding
//! product; this binary runs the core against the volatile store, which is
//! what CI and local evaluation use.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod args;

use anyhow::Context as _;
use args::Args;
use clap::Parser;
use vdesk_common::{
    testing::{MemoryBlob, MemoryStore},
    DisabledBlob, NoopMetrics, SystemClock, SystemRandom,
};
use vdesk_config::Config;
use vdesk_ingest::ImapConnector;
use vdesk_server::{Core, Services, Supervisor};

fn init_logs(args: &Args) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("--log-file needs a file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(
                    directory, file_name,
                ));

            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            if args.stdout {
                registry
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                    .try_init()?;
            } else {
                registry.with(file_layer).try_init()?;
            }
            Ok(Some(guard))
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                .try_init()?;
            Ok(None)
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    if args.check {
        println!("configuration ok");
        return Ok(());
    }

    let _log_guard = init_logs(&args)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        polling = config.polling.enabled,
        "vDesk core starting."
    );

    let attachments_enabled = config.blob.is_some();
    let blob: std::sync::Arc<dyn vdesk_common::BlobStore> = if attachments_enabled {
        std::sync::Arc::new(MemoryBlob::new())
    } else {
        std::sync::Arc::new(DisabledBlob)
    };
    if config.ai.api_key.is_some() {
        tracing::warn!(
            "LLM_API_KEY is set but this build links no vendor client; AI replies stay off."
        );
    }

    let imap_timeout = config.polling.timeout;
    let (core, receiver) = Core::assemble(
        std::sync::Arc::new(config),
        Services {
            store: std::sync::Arc::new(MemoryStore::new()),
            blob,
            attachments_enabled,
            generator: None,
            connector: std::sync::Arc::new(ImapConnector::new(imap_timeout)),
            clock: std::sync::Arc::new(SystemClock),
            random: std::sync::Arc::new(SystemRandom),
            metrics: std::sync::Arc::new(NoopMetrics),
        },
    );

    let supervisor = Supervisor::start(&core, receiver);
    tracing::info!("vDesk core running; ctrl-c stops it.");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    supervisor.stop().await;

    tracing::info!("Bye.");
    Ok(())
}
