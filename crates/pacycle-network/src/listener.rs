//! Peer listener for the coordinator side.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::channel::TcpChannel;
use crate::NetworkError;

/// Accepts subsystem connections on one local port.
pub struct PeerListener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl PeerListener {
    /// Bind `host:port`. Port 0 asks the OS for a free port.
    pub async fn bind(host: &str, port: u16) -> Result<Self, NetworkError> {
        let inner = TcpListener::bind((host, port)).await?;
        let local_addr = inner.local_addr()?;
        tracing::info!(addr = %local_addr, "Peer listener bound");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next peer and wrap it as a channel.
    pub async fn accept(&self) -> Result<(TcpChannel, SocketAddr), NetworkError> {
        let (stream, peer_addr) = self.inner.accept().await?;
        tracing::debug!(peer = %peer_addr, "Peer connected");
        Ok((TcpChannel::from_tcp(stream), peer_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_dynamic_port() {
        let listener = PeerListener::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }
}
