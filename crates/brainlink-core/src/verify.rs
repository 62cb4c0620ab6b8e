// ── Credential verification ──
//
// One-shot login used by setup flows: connect, handshake, authenticate,
// report the device id, and always close.

use brainlink_api::Connection;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::CoreError;

/// Log in once and return the controller's device id.
///
/// Errors keep their kind: an unreachable controller is
/// [`CoreError::ConnectionFailed`] (or `Timeout`), refused credentials are
/// [`CoreError::AuthenticationFailed`], and anything else, including a
/// login that reports no device id, is [`CoreError::Client`].
pub async fn verify_credentials(config: &SessionConfig) -> Result<String, CoreError> {
    let url = config.ws_url()?;
    let mut connection = Connection::new(config.connection_options());

    let result = login(&mut connection, &url, config).await;
    connection.close().await;

    let device_id = result?;
    debug!(device_id, "credentials verified");
    Ok(device_id)
}

async fn login(connection: &mut Connection, url: &url::Url, config: &SessionConfig) -> Result<String, CoreError> {
    connection.connect(url).await?;
    connection.secure_handshake().await?;
    connection
        .authenticate(&config.username, &config.password)
        .await?;

    connection
        .device_id()
        .map(str::to_owned)
        .ok_or_else(|| CoreError::Client {
            message: "controller did not report a device id".into(),
        })
}
