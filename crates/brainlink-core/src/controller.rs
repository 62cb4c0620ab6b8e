// ── Supervisor handle ──
//
// What consumers hold once the supervisor is running: state observation,
// entity snapshots, option changes, and a cooperative stop.

use std::sync::Arc;

use brainlink_api::{Command, Key};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::registry::Entity;
use crate::supervisor::{ConnectionState, Shared};

/// Cheaply cloneable handle to a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    pub(crate) fn new(shared: Arc<Shared>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                shared,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.shared.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Cancel the supervisor and wait for it to close the session.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "supervisor task panicked");
            }
            debug!("supervisor stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── State observation ────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// Connection state as a stream, starting with the current value.
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.connection_state())
    }

    /// Wait until the supervisor reaches a state matching `pred`.
    pub async fn wait_for_state(&self, pred: impl Fn(&ConnectionState) -> bool) -> Result<ConnectionState, CoreError> {
        let mut rx = self.connection_state();
        let state = rx
            .wait_for(pred)
            .await
            .map_err(|_| CoreError::ControllerDisconnected)?;
        Ok(state.clone())
    }

    // ── Entities ─────────────────────────────────────────────────

    pub fn entities(&self) -> Vec<Entity> {
        self.inner.shared.registry.snapshot()
    }

    pub fn entity(&self, key: Key) -> Option<Entity> {
        self.inner.shared.registry.get(key)
    }

    /// Receives a new version number whenever the entity set or any
    /// entity state changes.
    pub fn entity_changes(&self) -> watch::Receiver<u64> {
        self.inner.shared.registry.subscribe()
    }

    /// Change a selectable entity to `option`.
    ///
    /// The local state switches immediately; the controller is then told
    /// to show the value's screen and to set the new index, each step
    /// waiting for its acknowledgement.
    pub async fn select_option(&self, key: Key, option: &str) -> Result<(), CoreError> {
        let shared = &self.inner.shared;
        let correlator = shared
            .session
            .load_full()
            .ok_or(CoreError::ControllerDisconnected)?;

        let (plan, handle, state) = shared
            .registry
            .with_entity_mut(key, |entity| {
                if !entity.observable.is_selectable() {
                    return Err(CoreError::Unsupported {
                        operation: format!("changing {key}"),
                        required: "an editable choice value".into(),
                    });
                }
                let plan = entity
                    .observable
                    .request_option_change(option)
                    .ok_or_else(|| CoreError::InvalidOption {
                        key,
                        option: option.to_owned(),
                    })?;
                Ok((plan, entity.handle.clone(), entity.state()))
            })
            .ok_or(CoreError::EntityNotFound { key })??;

        shared.host.render(&handle, &state);
        info!(key = %key, option, screen = plan.screen, index = plan.index, "changing option");

        correlator
            .send_and_await_ack(Command::Navigate {
                screen: plan.screen,
            })
            .await?;
        correlator
            .send_and_await_ack(Command::Edit {
                key,
                value: plan.index,
            })
            .await?;

        debug!(key = %key, option, "option change acknowledged");
        Ok(())
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("host", &self.inner.shared.config.host)
            .field("state", &*self.inner.shared.state.borrow())
            .field("entities", &self.inner.shared.registry.len())
            .finish_non_exhaustive()
    }
}
