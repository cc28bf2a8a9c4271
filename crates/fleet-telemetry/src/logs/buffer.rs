// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor-based log buffer shared by many producers.
//!
//! Producers hold cloneable [`BufferHandle`]s and push entries over an
//! unbounded channel, so `insert_batch` never blocks and never needs a
//! runtime. A single [`BufferService`] task owns the queue. Because commands
//! are handled in channel order, a drain returns exactly the entries inserted
//! before it was requested; anything inserted afterwards waits for the next
//! drain.
//!
//! ```rust,ignore
//! let (service, handle) = BufferService::new(100_000);
//! tokio::spawn(service.run());
//!
//! handle.insert_batch(vec![entry])?;
//! let entries = handle.drain().await?;
//! ```

use crate::errors::TelemetryError;
use crate::logs::entry::LogEntry;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

#[derive(Debug)]
pub enum BufferCommand {
    /// Append entries, evicting the oldest when the queue is full.
    InsertBatch(Vec<LogEntry>),
    /// Put entries from a failed delivery back in front of the queue.
    Requeue(Vec<LogEntry>),
    /// Take everything currently queued.
    Drain(oneshot::Sender<Vec<LogEntry>>),
    Len(oneshot::Sender<usize>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct BufferHandle {
    tx: mpsc::UnboundedSender<BufferCommand>,
}

impl BufferHandle {
    /// Queue entries without waiting.
    pub fn insert_batch(&self, entries: Vec<LogEntry>) -> Result<(), TelemetryError> {
        self.tx
            .send(BufferCommand::InsertBatch(entries))
            .map_err(|_| TelemetryError::BufferClosed)
    }

    pub fn requeue(&self, entries: Vec<LogEntry>) -> Result<(), TelemetryError> {
        self.tx
            .send(BufferCommand::Requeue(entries))
            .map_err(|_| TelemetryError::BufferClosed)
    }

    /// Take every queued entry.
    ///
    /// The drain command is sent when this is called, not when the returned
    /// future is first polled, so entries inserted after the call are left for
    /// the next drain.
    pub fn drain(&self) -> impl Future<Output = Result<Vec<LogEntry>, TelemetryError>> {
        let (response_tx, response_rx) = oneshot::channel();
        let sent = self.tx.send(BufferCommand::Drain(response_tx));
        async move {
            sent.map_err(|_| TelemetryError::BufferClosed)?;
            response_rx.await.map_err(|_| TelemetryError::BufferClosed)
        }
    }

    pub async fn len(&self) -> Result<usize, TelemetryError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BufferCommand::Len(response_tx))
            .map_err(|_| TelemetryError::BufferClosed)?;
        response_rx.await.map_err(|_| TelemetryError::BufferClosed)
    }

    /// Stop the service. Further commands fail with [`TelemetryError::BufferClosed`].
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.tx
            .send(BufferCommand::Shutdown)
            .map_err(|_| TelemetryError::BufferClosed)
    }
}

pub struct BufferService {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    rx: mpsc::UnboundedReceiver<BufferCommand>,
}

impl BufferService {
    #[must_use]
    pub fn new(max_entries: usize) -> (Self, BufferHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            entries: VecDeque::new(),
            max_entries,
            rx,
        };
        (service, BufferHandle { tx })
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("LOGS | Buffer service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                BufferCommand::InsertBatch(entries) => self.insert(entries),
                BufferCommand::Requeue(entries) => self.requeue(entries),
                BufferCommand::Drain(response_tx) => {
                    let entries: Vec<_> = self.entries.drain(..).collect();
                    if response_tx.send(entries).is_err() {
                        error!("LOGS | Failed to send drain response - receiver dropped");
                    }
                }
                BufferCommand::Len(response_tx) => {
                    let _ = response_tx.send(self.entries.len());
                }
                BufferCommand::Shutdown => {
                    debug!("LOGS | Buffer service shutting down");
                    break;
                }
            }
        }
    }

    fn insert(&mut self, entries: Vec<LogEntry>) {
        let mut evicted = 0;
        for entry in entries {
            if self.entries.len() >= self.max_entries {
                self.entries.pop_front();
                evicted += 1;
            }
            self.entries.push_back(entry);
        }
        if evicted > 0 {
            warn!(
                "LOGS | Buffer full ({} entries), evicted {} oldest entries",
                self.max_entries, evicted
            );
        }
    }

    fn requeue(&mut self, entries: Vec<LogEntry>) {
        // Requeued entries are older than anything still queued, so they go
        // in front; the queue bound still applies.
        let room = self.max_entries.saturating_sub(self.entries.len());
        let skip = entries.len().saturating_sub(room);
        if skip > 0 {
            warn!(
                "LOGS | Buffer full, dropped {} requeued entries",
                skip
            );
        }
        for entry in entries.into_iter().skip(skip).rev() {
            self.entries.push_front(entry);
        }
    }
}
