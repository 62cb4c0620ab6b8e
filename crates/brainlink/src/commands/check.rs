use brainlink_core::{SessionConfig, verify_credentials};

use crate::error::CliError;

/// Log in once, print the device id, and disconnect.
pub async fn handle(session: &SessionConfig) -> Result<(), CliError> {
    let device_id = verify_credentials(session).await?;
    println!("{device_id}");
    Ok(())
}
