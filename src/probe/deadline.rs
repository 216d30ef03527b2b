use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use super::ProbeError;

/// Race `fut` against a deadline
///
/// Whichever finishes first wins. On expiry the operation future is dropped,
/// which closes its sockets and kills child processes spawned with
/// `kill_on_drop`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(deadline)),
    }
}
