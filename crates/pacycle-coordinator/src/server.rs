//! Event loop around [`AgentCoordinator`].
//!
//! One task owns the coordinator. Every link gets a reader task that turns
//! frames into [`LinkEvent`]s and a writer task fed by an unbounded queue,
//! so a slow peer never stalls dispatch. The loop multiplexes new
//! connections, link events, the cycle watchdog and the shutdown signal,
//! and carries out the directives the coordinator returns.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use pacycle_network::{connect_with_retry, PeerListener, Received, TcpChannel};
use pacycle_protocol::{
    ProtocolError, SimulationEndpoint, StimulusGenerator, Tic, WireMessage, CONNECT_RETRIES,
    CONNECT_RETRY_DELAY_MS,
};

use crate::coordinator::{AgentCoordinator, ConnId, Directive, Phase};
use crate::error::CoordinatorError;
use crate::selection::ActionSelector;

/// How long shutdown waits for subsystems to confirm DEAD.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Far-off instant for disabled timers in `select!`.
const IDLE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Subsystem(ConnId),
    Supervisor,
}

#[derive(Debug)]
enum Inbound {
    Message(WireMessage),
    Malformed(ProtocolError),
    Closed,
}

#[derive(Debug)]
struct LinkEvent {
    source: Source,
    inbound: Inbound,
}

enum Outbound {
    Message(WireMessage),
    Close,
}

struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn spawn(source: Source, channel: TcpChannel, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        let (mut reader, writer) = channel.into_split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Outbound>();

        let reader = tokio::spawn(async move {
            loop {
                let inbound = match reader.receive().await {
                    Ok(Received::Message(message)) => Inbound::Message(message),
                    Ok(Received::Closed) => Inbound::Closed,
                    Err(e) => Inbound::Malformed(e),
                };
                let closed = matches!(inbound, Inbound::Closed);
                if events.send(LinkEvent { source, inbound }).is_err() || closed {
                    break;
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(item) = queue.recv().await {
                match item {
                    Outbound::Message(message) => {
                        if let Err(e) = writer.send(&message).await {
                            tracing::warn!(link = ?source, error = %e, "Write failed");
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            if let Err(e) = writer.close().await {
                tracing::debug!(link = ?source, error = %e, "Close failed");
            }
        });

        Self {
            outbound,
            reader,
            writer,
        }
    }

    fn send(&self, message: WireMessage) {
        if self.outbound.send(Outbound::Message(message)).is_err() {
            tracing::debug!("Dropping message for closed link");
        }
    }

    /// Flush queued writes, then close. Stops reading at once.
    fn close(self) -> JoinHandle<()> {
        let _ = self.outbound.send(Outbound::Close);
        self.reader.abort();
        self.writer
    }
}

#[derive(Default)]
struct Links {
    peers: HashMap<ConnId, Link>,
    supervisor: Option<Link>,
    closing: Vec<JoinHandle<()>>,
}

impl Links {
    /// Carry out directives. Returns true on `Stop`.
    fn apply(&mut self, directives: Vec<Directive>) -> bool {
        self.closing.retain(|handle| !handle.is_finished());
        let mut stop = false;
        for directive in directives {
            match directive {
                Directive::Send { conn, message } => match self.peers.get(&conn) {
                    Some(link) => link.send(message),
                    None => tracing::debug!(conn = %conn, "No link for directive"),
                },
                Directive::Close { conn } => {
                    if let Some(link) = self.peers.remove(&conn) {
                        self.closing.push(link.close());
                    }
                }
                Directive::Supervisor(chunk) => {
                    if let Some(link) = &self.supervisor {
                        link.send(chunk.into());
                    }
                }
                Directive::CloseSupervisor => {
                    if let Some(link) = self.supervisor.take() {
                        self.closing.push(link.close());
                    }
                }
                Directive::Stop => stop = true,
            }
        }
        stop
    }

    async fn close_all(mut self, grace: Duration) {
        for (_, link) in self.peers.drain() {
            self.closing.push(link.close());
        }
        if let Some(link) = self.supervisor.take() {
            self.closing.push(link.close());
        }
        for handle in self.closing {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::debug!("Writer did not finish within grace period");
            }
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles_completed: u64,
    pub final_tic: Tic,
}

pub struct CoordinatorServer<S, P> {
    coordinator: AgentCoordinator<S, P>,
    listener: PeerListener,
    simulation: Option<SimulationEndpoint>,
    dial_attempts: u32,
    dial_delay: Duration,
    shutdown_grace: Duration,
}

impl<S, P> CoordinatorServer<S, P>
where
    S: StimulusGenerator,
    P: ActionSelector,
{
    /// Bind the peer listener. Port 0 picks a free port.
    pub async fn bind(
        coordinator: AgentCoordinator<S, P>,
        host: &str,
        port: u16,
    ) -> Result<Self, CoordinatorError> {
        let listener = PeerListener::bind(host, port).await?;
        Ok(Self {
            coordinator,
            listener,
            simulation: None,
            dial_attempts: CONNECT_RETRIES,
            dial_delay: Duration::from_millis(CONNECT_RETRY_DELAY_MS),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    pub fn with_simulation(mut self, endpoint: Option<SimulationEndpoint>) -> Self {
        self.simulation = endpoint;
        self
    }

    /// How hard to try reaching the simulation before running without it.
    pub fn with_dial_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.dial_attempts = attempts;
        self.dial_delay = delay;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Run until `shutdown` resolves, the cycle limit is hit, or the
    /// simulation orders the agent to die.
    pub async fn run<F>(self, shutdown: F) -> Result<RunSummary, CoordinatorError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut coordinator,
            listener,
            simulation,
            dial_attempts,
            dial_delay,
            shutdown_grace,
        } = self;

        let (events_tx, mut events) = mpsc::unbounded_channel::<LinkEvent>();
        let mut links = Links::default();

        if let Some(endpoint) = simulation {
            let addr = endpoint.address();
            match connect_with_retry(&addr, dial_attempts, dial_delay).await {
                Ok(channel) => {
                    tracing::info!(simulation = %addr, "Connected to simulation");
                    links.supervisor = Some(Link::spawn(Source::Supervisor, channel, events_tx.clone()));
                    links.apply(coordinator.attach_supervisor());
                }
                Err(e) => {
                    tracing::warn!(simulation = %addr, error = %e, "Simulation unreachable; running without it");
                }
            }
        }

        tracing::info!(addr = %listener.local_addr(), "Coordinator accepting subsystems");

        tokio::pin!(shutdown);
        let mut shutdown_seen = false;
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let watchdog = coordinator.watchdog();
            let watchdog_tic = watchdog.map(|(tic, _)| tic).unwrap_or_default();
            let watchdog_at = watchdog.map(|(_, at)| at).unwrap_or_else(|| Instant::now() + IDLE);
            let grace_at = grace_deadline.unwrap_or_else(|| Instant::now() + IDLE);

            let directives = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((channel, addr)) => {
                        let conn = Uuid::new_v4();
                        tracing::debug!(conn = %conn, peer = %addr, "Subsystem connected");
                        links.peers.insert(conn, Link::spawn(Source::Subsystem(conn), channel, events_tx.clone()));
                        coordinator.on_connect(conn)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        Vec::new()
                    }
                },

                Some(event) = events.recv() => handle_event(&mut coordinator, &mut links, event),

                _ = sleep_until(watchdog_at), if watchdog.is_some() => coordinator.on_timeout(watchdog_tic),

                _ = &mut shutdown, if !shutdown_seen => {
                    tracing::info!("Shutdown requested");
                    shutdown_seen = true;
                    coordinator.shutdown()
                }

                _ = sleep_until(grace_at), if grace_deadline.is_some() => {
                    tracing::warn!(remaining = coordinator.registry().len(), "Shutdown grace expired");
                    break;
                }
            };

            let stop = links.apply(directives);
            if stop || coordinator.is_finished() {
                break;
            }
            if coordinator.phase() == Phase::ShuttingDown && grace_deadline.is_none() {
                grace_deadline = Some(Instant::now() + shutdown_grace);
            }
        }

        links.close_all(shutdown_grace).await;

        let summary = RunSummary {
            cycles_completed: coordinator.cycles_completed(),
            final_tic: coordinator.tic(),
        };
        tracing::info!(cycles = summary.cycles_completed, tic = summary.final_tic, "Coordinator stopped");
        Ok(summary)
    }
}

fn handle_event<S, P>(
    coordinator: &mut AgentCoordinator<S, P>,
    links: &mut Links,
    event: LinkEvent,
) -> Vec<Directive>
where
    S: StimulusGenerator,
    P: ActionSelector,
{
    match (event.source, event.inbound) {
        (Source::Subsystem(conn), Inbound::Message(message)) => {
            let label = message.label();
            coordinator.on_message(conn, message).unwrap_or_else(|e| {
                tracing::warn!(conn = %conn, message = %label, error = %e, "Message rejected");
                Vec::new()
            })
        }
        (Source::Subsystem(conn), Inbound::Malformed(e)) => {
            tracing::warn!(conn = %conn, error = %e, "Dropping malformed frame");
            Vec::new()
        }
        (Source::Subsystem(conn), Inbound::Closed) => {
            if let Some(link) = links.peers.remove(&conn) {
                links.closing.push(link.close());
            }
            coordinator.on_disconnect(conn)
        }
        (Source::Supervisor, Inbound::Message(message)) => {
            let label = message.label();
            coordinator.on_supervisor_message(message).unwrap_or_else(|e| {
                tracing::warn!(message = %label, error = %e, "Simulation message rejected");
                Vec::new()
            })
        }
        (Source::Supervisor, Inbound::Malformed(e)) => {
            tracing::warn!(error = %e, "Dropping malformed frame from simulation");
            Vec::new()
        }
        (Source::Supervisor, Inbound::Closed) => {
            if let Some(link) = links.supervisor.take() {
                links.closing.push(link.close());
            }
            coordinator.on_supervisor_lost()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_close_handles_are_reaped() {
        let mut links = Links::default();

        let done = tokio::spawn(async {});
        while !done.is_finished() {
            tokio::task::yield_now().await;
        }
        links.closing.push(done);
        let pending = tokio::spawn(std::future::pending::<()>());
        links.closing.push(pending);

        assert!(!links.apply(Vec::new()));
        assert_eq!(links.closing.len(), 1);
        assert!(!links.closing[0].is_finished());

        links.closing.pop().unwrap().abort();
    }
}
