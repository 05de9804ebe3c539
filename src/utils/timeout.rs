use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for connection setup and single operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the key exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a server worker waits for the next message before dropping the peer
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default time allowed for workers to finish after shutdown is requested
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future` with a deadline, mapping expiry to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
