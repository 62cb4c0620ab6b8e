//! `brainlink run`: keep the controller connected until Ctrl-C.

use std::sync::Arc;

use tokio_stream::StreamExt;

use brainlink_core::{ConnectionState, SessionConfig, Supervisor};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::host::{ConsoleHost, should_color};

pub async fn handle(session: SessionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let host = Arc::new(ConsoleHost::new(should_color(global.color)));
    let handle = Supervisor::start(session, host);

    let mut states = handle.state_stream();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            res = &mut interrupted => {
                res?;
                break;
            }
            state = states.next() => match state {
                Some(ConnectionState::Cancelled) | None => break,
                Some(state @ ConnectionState::Backoff { .. }) => tracing::warn!(%state, "session lost"),
                Some(state) => tracing::info!(%state, "supervisor"),
            },
        }
    }

    handle.stop().await;
    tracing::info!(entities = handle.entities().len(), "stopped");
    Ok(())
}
