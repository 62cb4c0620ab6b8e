//! Request/ack correlation over the push-based update stream.
//!
//! The controller acknowledges `navigate` and `edit` frames with an
//! unsolicited `{"type":"ack","id":N}` somewhere in the middle of the
//! update stream. [`AckCorrelator`] hands out ids, parks a waiter per id
//! and lets the reader task resolve it without ever blocking update
//! delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::wire::{ClientMessage, Command};

/// Cheaply cloneable handle to one session's outbound queue and its
/// pending acknowledgements.
#[derive(Clone)]
pub struct AckCorrelator {
    inner: Arc<Inner>,
}

struct Inner {
    outbound: mpsc::Sender<ClientMessage>,
    pending: DashMap<u64, oneshot::Sender<()>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl AckCorrelator {
    pub(crate) fn new(outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbound,
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Send `command` and wait for the controller to acknowledge it.
    ///
    /// Fails with [`Error::ConnectionClosed`] if the session ends first.
    /// Dropping the returned future forgets the waiter.
    pub async fn send_and_await_ack(&self, command: Command) -> Result<(), Error> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);
        let _guard = PendingGuard {
            inner: &self.inner,
            id,
        };

        // Checked after registering so a concurrent `fail_all` cannot miss us.
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        tracing::debug!(id, ?command, "sending command");
        self.inner
            .outbound
            .send(command.into_message(id))
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        rx.await.map_err(|_| Error::ConnectionClosed)?;
        tracing::debug!(id, "command acknowledged");
        Ok(())
    }

    /// Wake the waiter for `id`. Returns `false` for unknown ids.
    pub(crate) fn resolve(&self, id: u64) -> bool {
        self.inner
            .pending
            .remove(&id)
            .is_some_and(|(_, waiter)| waiter.send(()).is_ok())
    }

    /// Fail every pending waiter and refuse new commands.
    pub(crate) fn fail_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.pending.clear();
    }

    /// Number of commands still waiting for an ack.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AckCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckCorrelator")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.id);
    }
}
