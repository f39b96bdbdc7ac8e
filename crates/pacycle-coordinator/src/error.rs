use thiserror::Error;
use uuid::Uuid;

use pacycle_network::NetworkError;
use pacycle_protocol::{ControlString, ProtocolError};
use pacycle_state::LifecycleError;

/// Errors surfaced by the coordinator. Apart from a failed bind, each is
/// local to one message or one link and never stops the event loop.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("message on unknown connection {0}")]
    UnknownConnection(Uuid),

    #[error("control {control} not accepted from {peer}")]
    UnexpectedControl { control: ControlString, peer: String },

    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}
