use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mtc_shdr::write_lines;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::{AdapterEvent, ClientId, EventBus};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum ClientWriteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
    #[error("write task failed: {0}")]
    Task(#[from] JoinError),
}

/// At least one client could not be written to. Those clients have been
/// dropped; the rest received the lines.
#[derive(Debug, Error)]
#[error("failed to write to {failed} of {attempted} clients")]
pub struct SendError {
    pub failed: usize,
    pub attempted: usize,
}

struct ClientConnection {
    /// Serializes writers so lines from concurrent sends never interleave.
    writer: Arc<Mutex<BoxedWriter>>,
    cancel: CancellationToken,
    addr: Option<SocketAddr>,
}

/// Connected agents and line fan-out.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<DashMap<ClientId, Arc<ClientConnection>>>,
    write_timeout: Duration,
    events: EventBus,
}

impl ClientRegistry {
    pub fn new(write_timeout: Duration, events: EventBus) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            write_timeout,
            events,
        }
    }

    /// Adds a client and writes its initial lines before anything else can
    /// reach it.
    ///
    /// `initial` runs after the client is visible to broadcasts but while its
    /// writer is still held, so nothing sent in between can be lost or
    /// overtake the replay. Registering an id twice replaces the old entry.
    pub async fn register<F>(
        &self,
        id: ClientId,
        addr: Option<SocketAddr>,
        writer: BoxedWriter,
        cancel: CancellationToken,
        initial: F,
    ) -> Result<(), ClientWriteError>
    where
        F: FnOnce() -> Vec<String>,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut guard = Arc::clone(&writer).lock_owned().await;

        let connection = Arc::new(ClientConnection {
            writer,
            cancel,
            addr,
        });
        if let Some(previous) = self.clients.insert(id, connection) {
            previous.cancel.cancel();
        }
        info!(client = %id, addr = ?addr, clients = self.clients.len(), "agent registered");

        let lines = initial();
        let written = self.write_timed(&mut **guard, &lines).await;
        drop(guard);

        match written {
            Ok(()) => {
                self.emit_sent(id, &lines);
                Ok(())
            }
            Err(e) => {
                self.unregister(id);
                Err(e)
            }
        }
    }

    /// Removes a client and cancels its connection tasks. Returns whether it
    /// was registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        match self.clients.remove(&id) {
            Some((_, connection)) => {
                connection.cancel.cancel();
                info!(client = %id, addr = ?connection.addr, "agent unregistered");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    async fn write_timed<W>(&self, writer: &mut W, lines: &[String]) -> Result<(), ClientWriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::time::timeout(self.write_timeout, write_lines(writer, lines))
            .await
            .map_err(|_| ClientWriteError::Timeout(self.write_timeout))??;
        Ok(())
    }

    async fn write_to(
        &self,
        connection: &ClientConnection,
        lines: &[String],
    ) -> Result<(), ClientWriteError> {
        let mut writer = connection.writer.lock().await;
        self.write_timed(&mut **writer, lines).await
    }

    fn emit_sent(&self, id: ClientId, lines: &[String]) {
        if !self.events.is_observed() {
            return;
        }
        for line in lines {
            self.events.emit(AdapterEvent::LineSent {
                client: id,
                line: line.clone(),
            });
        }
    }

    /// Writes `lines` to one client as a single contiguous block.
    pub async fn send_to(&self, id: ClientId, lines: &[String]) -> Result<(), ClientWriteError> {
        let connection = self
            .clients
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ClientWriteError::UnknownClient(id))?;

        self.write_to(&connection, lines).await?;
        self.emit_sent(id, lines);
        Ok(())
    }

    /// Writes `lines` to every connected client.
    ///
    /// Clients are written concurrently, each getting the whole batch under
    /// its own write lock, so a multi-line block is never split by other
    /// traffic and a stalled client holds up nobody but itself. A failing
    /// client is reported and dropped. With no clients connected this
    /// succeeds.
    pub async fn broadcast(&self, lines: &[String]) -> Result<(), SendError> {
        if lines.is_empty() {
            return Ok(());
        }

        let lines: Arc<[String]> = lines.into();
        let mut writes = JoinSet::new();
        let mut owners = HashMap::new();

        for entry in self.clients.iter() {
            let id = *entry.key();
            let connection = Arc::clone(entry.value());
            let registry = self.clone();
            let lines = Arc::clone(&lines);
            let handle = writes.spawn(async move { registry.write_to(&connection, &lines).await });
            owners.insert(handle.id(), id);
        }

        let attempted = owners.len();
        let mut failed = 0;

        while let Some(joined) = writes.join_next_with_id().await {
            let (task, result) = match joined {
                Ok((task, result)) => (task, result),
                Err(e) => (e.id(), Err(ClientWriteError::from(e))),
            };
            let Some(&id) = owners.get(&task) else {
                continue;
            };

            match result {
                Ok(()) => self.emit_sent(id, &lines),
                Err(e) => {
                    warn!(client = %id, error = %e, "write to agent failed");
                    failed += 1;
                    self.events.emit(AdapterEvent::SendError {
                        client: id,
                        message: e.to_string(),
                    });
                    self.unregister(id);
                }
            }
        }

        if failed > 0 {
            Err(SendError { failed, attempted })
        } else {
            Ok(())
        }
    }

    /// Drops every client.
    pub fn clear(&self) {
        let ids: Vec<ClientId> = self.clients.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.unregister(id);
        }
    }
}
