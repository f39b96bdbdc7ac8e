//! pacycle network layer.
//!
//! - [`channel`]: one duplex byte connection wrapped as a message channel
//!   with explicit newline framing
//! - [`listener`]: the coordinator's peer listener on a dynamic local port
//! - [`dial`]: outbound connections with bounded retry

pub mod channel;
pub mod dial;
pub mod listener;

pub use channel::{ChannelReader, ChannelWriter, MessageChannel, Received, TcpChannel};
pub use dial::connect_with_retry;
pub use listener::PeerListener;

use thiserror::Error;

/// Write failure, unencodable message, or failed dial.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] pacycle_protocol::ProtocolError),

    #[error("could not connect to {addr} after {attempts} attempts: {last_error}")]
    ConnectFailed {
        addr: String,
        attempts: u32,
        last_error: String,
    },
}
