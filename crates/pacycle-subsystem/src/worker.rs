//! Async runner for [`SubsystemProtocol`] over one message channel.

use tokio::io::{AsyncRead, AsyncWrite};

use pacycle_network::{MessageChannel, Received};
use pacycle_protocol::{ActionGenerator, WireMessage};

use crate::protocol::{Effect, SubsystemError, SubsystemProtocol, WorkerState};

/// How a worker session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub identity: String,
    pub cycles_completed: u64,
    pub actions_acked: u64,
    /// True when the coordinator closed the connection rather than
    /// ordering a shutdown.
    pub dropped: bool,
}

/// Drive `protocol` until the session closes.
///
/// Per-message errors are logged and the session continues. Only a failed
/// write ends the run with an error.
pub async fn run_worker<R, W, G>(
    mut channel: MessageChannel<R, W>,
    protocol: &mut SubsystemProtocol<G>,
) -> Result<WorkerSummary, SubsystemError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    G: ActionGenerator,
{
    let dropped = loop {
        let message = match channel.receive().await {
            Ok(Received::Message(message)) => message,
            Ok(Received::Closed) => break true,
            Err(e) => {
                tracing::warn!(identity = %protocol.identity(), error = %e, "Dropping undecodable frame");
                continue;
            }
        };

        tracing::trace!(identity = %protocol.identity(), message = %message.label(), "Received");

        let effects = match protocol.handle(message) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::warn!(identity = %protocol.identity(), state = %protocol.state(), error = %e, "Message rejected");
                continue;
            }
        };

        let mut close = false;
        for effect in effects {
            match effect {
                Effect::Send(chunk) => channel.send(&WireMessage::Chunk(chunk)).await?,
                Effect::Close => close = true,
            }
        }
        if close {
            break false;
        }
    };

    if dropped && protocol.state() != WorkerState::Closed {
        tracing::warn!(identity = %protocol.identity(), "Coordinator closed the connection");
    }

    let (_, writer) = channel.into_split();
    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "Close after session end failed");
    }

    Ok(WorkerSummary {
        identity: protocol.identity().to_string(),
        cycles_completed: protocol.cycles_completed(),
        actions_acked: protocol.actions_acked(),
        dropped,
    })
}
