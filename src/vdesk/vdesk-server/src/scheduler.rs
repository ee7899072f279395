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

use vdesk_ticket::AiTrigger;

/// This instance can emit AI triggers towards the coordinator task. Both
/// the HTTP edge (web/API tickets) and the inbound poller publish here.
pub struct Emitter {
    ai: tokio::sync::mpsc::Sender<AiTrigger>,
}

impl Emitter {
    /// Queue a trigger for the AI coordinator.
    ///
    /// # Errors
    ///
    /// * the coordinator is gone (shutdown)
    #[tracing::instrument(skip(self))]
    pub async fn send_to_ai(&self, trigger: AiTrigger) -> std::io::Result<()> {
        match self.ai.send(trigger).await {
            Ok(()) => Ok(()),
            Err(_err) => Err(std::io::Error::from(std::io::ErrorKind::ConnectionAborted)),
        }
    }

    /// A raw sender handle for components that hold their own channel end
    /// (the ingest pipeline).
    #[must_use]
    pub fn ai_sender(&self) -> tokio::sync::mpsc::Sender<AiTrigger> {
        self.ai.clone()
    }
}

/// This instance receives the triggers the coordinator consumes.
pub struct Receiver {
    inner: tokio::sync::mpsc::Receiver<AiTrigger>,
}

impl Receiver {
    /// Produce a stream of triggers.
    pub fn as_stream(&mut self) -> impl tokio_stream::Stream<Item = AiTrigger> + '_ {
        async_stream::stream! {
            while let Some(trigger) = self.inner.recv().await {
                yield trigger;
            }
        }
    }
}

/// Build the channel pair between the ingestion paths and the AI
/// coordinator task.
#[must_use]
pub fn init(ai_channel_size: usize) -> (std::sync::Arc<Emitter>, Receiver) {
    let (ai_tx, ai_rx) = tokio::sync::mpsc::channel(ai_channel_size);

    (
        std::sync::Arc::new(Emitter { ai: ai_tx }),
        Receiver { inner: ai_rx },
    )
}
