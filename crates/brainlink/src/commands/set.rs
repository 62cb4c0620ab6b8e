//! `brainlink set`: connect, wait for a value to appear, change its option.

use std::sync::Arc;
use std::time::Duration;

use brainlink_core::{CoreError, SessionConfig, Supervisor, SupervisorHandle};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::host::{ConsoleHost, should_color};

pub async fn handle(session: SessionConfig, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let host = Arc::new(ConsoleHost::new(should_color(global.color)));
    let handle = Supervisor::start(session, host);

    let result = select(&handle, &args).await;
    handle.stop().await;
    result?;

    println!("{} -> {}", args.key, args.option);
    Ok(())
}

async fn select(handle: &SupervisorHandle, args: &SetArgs) -> Result<(), CliError> {
    let mut changes = handle.entity_changes();
    let appeared = tokio::time::timeout(Duration::from_secs(args.wait), async {
        while handle.entity(args.key).is_none() {
            changes
                .changed()
                .await
                .map_err(|_| CoreError::ControllerDisconnected)?;
        }
        Ok::<_, CoreError>(())
    })
    .await;

    appeared.map_err(|_| CoreError::EntityNotFound { key: args.key })??;
    handle.select_option(args.key, &args.option).await?;
    Ok(())
}
