//! Outbound connections with bounded retry.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::channel::TcpChannel;
use crate::NetworkError;

/// Dial `addr`, retrying up to `attempts` times with a fixed delay.
///
/// Workers are usually launched alongside the coordinator and may start
/// before its listener is up, so a refused connection is not fatal until
/// the attempts run out.
pub async fn connect_with_retry(
    addr: &str,
    attempts: u32,
    delay: Duration,
) -> Result<TcpChannel, NetworkError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(addr = %addr, attempt, "Connected");
                return Ok(TcpChannel::from_tcp(stream));
            }
            Err(e) => {
                tracing::debug!(addr = %addr, attempt, error = %e, "Connect attempt failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(NetworkError::ConnectFailed {
        addr: addr.to_string(),
        attempts,
        last_error,
    })
}
