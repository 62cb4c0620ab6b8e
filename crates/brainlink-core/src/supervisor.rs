// ── Reconnection supervisor ──
//
// One background task that keeps a single session alive: reset, connect,
// handshake, login, stream, and on any failure back off and start over.
// Only cancellation ends the loop. The transport is closed on every path
// out of a session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use brainlink_api::{AckCorrelator, Connection};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::controller::SupervisorHandle;
use crate::dispatch::Dispatcher;
use crate::error::CoreError;
use crate::host::EntityHost;
use crate::registry::Registry;

/// Delay before reconnect attempt `n` is `BACKOFF_TABLE_SECS[min(n-1, 3)]`.
pub const BACKOFF_TABLE_SECS: [u64; 4] = [0, 5, 10, 60];

/// Delay before the next attempt, or `None` when no failure has happened
/// since the last successful login.
pub fn backoff_delay(retries: u32) -> Option<Duration> {
    let idx = usize::try_from(retries.checked_sub(1)?).unwrap_or(usize::MAX);
    let secs = BACKOFF_TABLE_SECS[idx.min(BACKOFF_TABLE_SECS.len() - 1)];
    Some(Duration::from_secs(secs))
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Supervisor state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32 },
    Authenticating,
    Streaming,
    Backoff { retries: u32, delay: Duration },
    Cancelled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Streaming => f.write_str("streaming"),
            Self::Backoff { retries, delay } => {
                write!(f, "waiting {}s before retry {retries}", delay.as_secs())
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────────

/// State shared between the supervisor task and its handle.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) host: Arc<dyn EntityHost>,
    pub(crate) registry: Arc<Registry>,
    /// Correlator of the live session; `None` outside `Streaming`.
    pub(crate) session: ArcSwapOption<AckCorrelator>,
    pub(crate) state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        debug!(state = %state, "supervisor state");
        let _ = self.state.send_replace(state);
    }

    /// Forget the previous session and everything it materialized.
    fn reset(&self) {
        self.session.store(None);
        let handles = self.registry.drain_handles();
        if !handles.is_empty() {
            debug!(count = handles.len(), "removing entities from previous session");
        }
        self.host.remove_all(handles);
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

pub struct Supervisor;

impl Supervisor {
    /// Spawn the supervisor task. Must be called inside a tokio runtime.
    pub fn start(config: SessionConfig, host: Arc<dyn EntityHost>) -> SupervisorHandle {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(Shared {
            config,
            host,
            registry: Arc::new(Registry::new()),
            session: ArcSwapOption::empty(),
            state,
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&shared), cancel.clone()));
        SupervisorHandle::new(shared, cancel, task)
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut retries: u32 = 0;

    loop {
        if let Some(delay) = backoff_delay(retries) {
            shared.set_state(ConnectionState::Backoff { retries, delay });
            info!(retries, delay_secs = delay.as_secs(), "reconnecting after backoff");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        shared.reset();
        let mut connection = Connection::new(shared.config.connection_options());

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            err = drive(&shared, &mut connection, &mut retries) => Some(err),
        };

        connection.close().await;
        shared.session.store(None);

        match outcome {
            None => break,
            Some(err) => {
                retries = retries.saturating_add(1);
                warn!(error = %err, retries, "session ended");
            }
        }
    }

    shared.set_state(ConnectionState::Cancelled);
    debug!("supervisor exiting");
}

/// One session, start to finish. Only returns on failure.
async fn drive(shared: &Shared, connection: &mut Connection, retries: &mut u32) -> CoreError {
    if let Err(e) = establish(shared, connection, retries).await {
        return e;
    }

    let dispatcher = Dispatcher::new(
        Arc::clone(&shared.registry),
        Arc::clone(&shared.host),
        shared.config.area.clone(),
    );
    connection
        .consume_updates(|update| {
            dispatcher.handle(&update);
        })
        .await
        .into()
}

async fn establish(shared: &Shared, connection: &mut Connection, retries: &mut u32) -> Result<(), CoreError> {
    let url = shared.config.ws_url()?;

    shared.set_state(ConnectionState::Connecting {
        attempt: retries.saturating_add(1),
    });
    connection.connect(&url).await?;
    connection.secure_handshake().await?;

    shared.set_state(ConnectionState::Authenticating);
    connection
        .authenticate(&shared.config.username, &shared.config.password)
        .await?;
    *retries = 0;

    connection.subscribe().await?;
    shared.session.store(connection.correlator().map(Arc::new));
    shared.set_state(ConnectionState::Streaming);
    info!(
        device_id = connection.device_id().unwrap_or("-"),
        "connected; streaming updates"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_table() {
        let delays: Vec<Option<u64>> = (0..7).map(|r| backoff_delay(r).map(|d| d.as_secs())).collect();
        assert_eq!(
            delays,
            vec![None, Some(0), Some(5), Some(10), Some(60), Some(60), Some(60)]
        );
        assert_eq!(backoff_delay(u32::MAX), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_walk_the_backoff_table() {
        let config = SessionConfig::new(
            "ftp://nowhere",
            "admin",
            secrecy::SecretString::from("hunter2".to_string()),
        );
        let started = tokio::time::Instant::now();
        let handle = Supervisor::start(config, Arc::new(crate::host::MemoryHost::new()));

        let state = handle
            .wait_for_state(|s| matches!(s, ConnectionState::Backoff { retries: 4, .. }))
            .await
            .unwrap();
        assert_eq!(
            state,
            ConnectionState::Backoff {
                retries: 4,
                delay: Duration::from_secs(60)
            }
        );
        // 0 + 5 + 10 seconds slept before the fourth retry is scheduled.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(15) && waited < Duration::from_secs(60));

        handle.stop().await;
        assert!(handle.is_stopped());
    }

    #[test]
    fn state_display() {
        assert_eq!(
            ConnectionState::Backoff {
                retries: 2,
                delay: Duration::from_secs(5)
            }
            .to_string(),
            "waiting 5s before retry 2"
        );
    }
}
