//! Agent coordinator: single owner of the registry, the barrier and the
//! cycle state.
//!
//! The coordinator does no I/O. Every input (a connection, a message, a
//! disconnect, a watchdog expiry) is handled to completion and yields a list
//! of [`Directive`]s for the event loop to carry out. Because only the loop
//! calls into it, no two dispatches ever interleave, and `tic`, `pending`
//! and the barrier's outstanding set are only changed from here.
//!
//! Cycle policy:
//!
//! - The coordinator gathers until every required subsystem is READY, then
//!   broadcasts the first stimulus with tic 0.
//! - A required peer lost mid-cycle is evicted from the barrier at once. If
//!   that releases the barrier the cycle advances with whatever actions were
//!   accepted so far. If no required peer is left the coordinator goes back
//!   to gathering and reruns the abandoned tic once its peers are back.
//! - Each armed tic has a deadline. On expiry the cycle advances with the
//!   partial pending set; the laggards stay required and anything they send
//!   for the old tic is rejected as stale.
//! - While a simulation session is attached, a cycle only starts from the
//!   sensory input it supplies. Between inputs the coordinator holds.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use pacycle_protocol::{
    AgentContext, Chunk, ChunkKind, ChunkNamer, ControlString, DimensionCatalogue, KindFamily,
    Payload, ProtocolError, StimulusGenerator, Tic, WireMessage, COORDINATOR_ID,
    COORDINATOR_PREFIX, PRE_JOIN_TIC,
};
use pacycle_state::{CycleBarrier, LifecycleError, PeerEvent, PeerState, SubsystemRegistry};

use crate::error::CoordinatorError;
use crate::selection::ActionSelector;
use crate::supervisor::{SupervisorAction, SupervisorSession};

/// Handle of one accepted subsystem connection.
pub type ConnId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting until every required subsystem is READY.
    Gathering,
    /// Peers are ready; waiting for the simulation's next sensory input.
    Holding,
    Running,
    ShuttingDown,
}

/// Work for the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Send { conn: ConnId, message: WireMessage },
    /// Close one subsystem channel. Does not cascade.
    Close { conn: ConnId },
    /// Send on the simulation link.
    Supervisor(Chunk),
    CloseSupervisor,
    /// Nothing left to coordinate; the loop may exit.
    Stop,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub agent_name: String,
    pub required: Vec<String>,
    pub cycle_timeout: Duration,
    pub max_cycles: Option<u64>,
    pub catalogue: DimensionCatalogue,
}

impl CoordinatorConfig {
    pub fn from_context(context: &AgentContext) -> Self {
        Self {
            agent_name: context.agent.name.clone(),
            required: context.agent.required_subsystems.clone(),
            cycle_timeout: context.agent.cycle_timeout(),
            max_cycles: context.agent.max_cycles,
            catalogue: context.dimensions.clone(),
        }
    }
}

pub struct AgentCoordinator<S, P> {
    agent_name: String,
    registry: SubsystemRegistry<ConnId>,
    barrier: CycleBarrier,
    namer: ChunkNamer,
    phase: Phase,
    tic: Tic,
    pending: Vec<Chunk>,
    catalogue: DimensionCatalogue,
    stimulus: S,
    selector: P,
    /// Payload supplied by the simulation for the next stimulus.
    queued_stimulus: Option<Payload>,
    /// Simulation input the armed cycle was started from.
    cycle_input: Option<Payload>,
    supervisor: Option<SupervisorSession>,
    cycle_timeout: Duration,
    deadline: Option<(Tic, Instant)>,
    max_cycles: Option<u64>,
    cycles_completed: u64,
    last_selection: Option<Chunk>,
}

impl<S, P> AgentCoordinator<S, P>
where
    S: StimulusGenerator,
    P: ActionSelector,
{
    pub fn new(config: CoordinatorConfig, stimulus: S, selector: P) -> Self {
        Self {
            agent_name: config.agent_name,
            registry: SubsystemRegistry::new(config.required.iter().cloned()),
            barrier: CycleBarrier::new(config.required),
            namer: ChunkNamer::new(COORDINATOR_PREFIX),
            phase: Phase::Gathering,
            tic: 0,
            pending: Vec::new(),
            catalogue: config.catalogue,
            stimulus,
            selector,
            queued_stimulus: None,
            cycle_input: None,
            supervisor: None,
            cycle_timeout: config.cycle_timeout,
            deadline: None,
            max_cycles: config.max_cycles,
            cycles_completed: 0,
            last_selection: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Tic of the cycle in flight (or the next one, while gathering).
    pub fn tic(&self) -> Tic {
        self.tic
    }

    pub fn pending(&self) -> &[Chunk] {
        &self.pending
    }

    pub fn barrier(&self) -> &CycleBarrier {
        &self.barrier
    }

    pub fn registry(&self) -> &SubsystemRegistry<ConnId> {
        &self.registry
    }

    pub fn selector(&self) -> &P {
        &self.selector
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn last_selection(&self) -> Option<&Chunk> {
        self.last_selection.as_ref()
    }

    pub fn supervisor(&self) -> Option<&SupervisorSession> {
        self.supervisor.as_ref()
    }

    /// Armed tic and the instant its watchdog fires.
    pub fn watchdog(&self) -> Option<(Tic, Instant)> {
        self.deadline
    }

    /// True once shutdown has been ordered and every peer is gone.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::ShuttingDown && self.registry.is_empty()
    }

    // ── Subsystem links ─────────────────────────────────────────────

    pub fn on_connect(&mut self, conn: ConnId) -> Vec<Directive> {
        if self.phase == Phase::ShuttingDown {
            return vec![
                Directive::Send {
                    conn,
                    message: ControlString::Die.into(),
                },
                Directive::Close { conn },
            ];
        }
        self.registry.welcome(conn);
        vec![Directive::Send {
            conn,
            message: ControlString::Welcome.into(),
        }]
    }

    /// Dispatch one inbound message. An error rejects that message only;
    /// the connection and the cycle are unaffected.
    pub fn on_message(
        &mut self,
        conn: ConnId,
        message: WireMessage,
    ) -> Result<Vec<Directive>, CoordinatorError> {
        if self.registry.by_handle(&conn).is_none() {
            return Err(CoordinatorError::UnknownConnection(conn));
        }
        self.registry.touch(&conn);

        match message {
            WireMessage::Control(ControlString::Die) => {
                tracing::info!(conn = %conn, "Peer closed its channel with !DIE");
                Ok(self.drop_peer(conn, true))
            }
            WireMessage::Control(control) => Err(CoordinatorError::UnexpectedControl {
                control,
                peer: self.peer_label(&conn),
            }),
            WireMessage::Chunk(chunk) => self.on_chunk(conn, chunk),
        }
    }

    /// The connection went away without a DEAD.
    pub fn on_disconnect(&mut self, conn: ConnId) -> Vec<Directive> {
        self.drop_peer(conn, false)
    }

    /// Watchdog expiry for `tic`. Ignored when that tic is no longer armed.
    pub fn on_timeout(&mut self, tic: Tic) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.phase != Phase::Running
            || self.barrier.tic() != Some(tic)
            || self.barrier.is_released()
        {
            return out;
        }

        tracing::warn!(
            tic,
            outstanding = ?self.barrier.outstanding(),
            accepted = self.pending.len(),
            "Cycle timed out; advancing with partial results"
        );
        self.advance(&mut out);
        out
    }

    /// Order every subsystem to shut down.
    pub fn shutdown(&mut self) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.phase == Phase::ShuttingDown {
            return out;
        }

        tracing::info!(tic = self.tic, cycles = self.cycles_completed, "Coordinator shutting down");
        self.phase = Phase::ShuttingDown;
        self.barrier.disarm();
        self.deadline = None;
        if !self.pending.is_empty() {
            tracing::warn!(discarded = self.pending.len(), "Discarding actions of unfinished cycle");
            self.pending.clear();
        }

        let joined: Vec<(String, ConnId, PeerState)> = self
            .registry
            .joined()
            .map(|(id, record)| (id.to_string(), record.handle, record.state))
            .collect();
        for (identity, conn, state) in joined {
            if state == PeerState::Dying {
                continue;
            }
            if let Err(e) = self.registry.advance(&identity, PeerEvent::Die) {
                tracing::debug!(peer = %identity, error = %e, "DIE transition refused");
            }
            let die = self
                .namer
                .chunk(ChunkKind::Die, COORDINATOR_ID, &identity, self.tic);
            out.push(Directive::Send {
                conn,
                message: die.into(),
            });
        }

        let unbound: Vec<ConnId> = self
            .registry
            .handles()
            .filter(|h| self.registry.identity_of(h).is_none())
            .copied()
            .collect();
        for conn in unbound {
            self.registry.remove_handle(&conn, &mut self.barrier);
            out.push(Directive::Send {
                conn,
                message: ControlString::Die.into(),
            });
            out.push(Directive::Close { conn });
        }

        if self.supervisor.take().is_some() {
            out.push(Directive::CloseSupervisor);
        }
        if self.registry.is_empty() {
            out.push(Directive::Stop);
        }
        out
    }

    // ── Simulation link ─────────────────────────────────────────────

    /// Start a session on a freshly opened simulation link.
    pub fn attach_supervisor(&mut self) -> Vec<Directive> {
        let mut session = SupervisorSession::new(self.agent_name.clone());
        let join = session.on_connect(&mut self.namer, self.tic);
        self.supervisor = Some(session);
        join.map(Directive::Supervisor).into_iter().collect()
    }

    pub fn on_supervisor_message(
        &mut self,
        message: WireMessage,
    ) -> Result<Vec<Directive>, CoordinatorError> {
        let Some(session) = self.supervisor.as_mut() else {
            return Ok(Vec::new());
        };
        let actions = session.handle(message, &mut self.namer, self.tic)?;

        let mut out = Vec::new();
        for action in actions {
            match action {
                SupervisorAction::Send(chunk) => out.push(Directive::Supervisor(chunk)),
                SupervisorAction::QueueStimulus(payload) => {
                    if self.queued_stimulus.replace(payload).is_some() {
                        tracing::debug!("Replacing unused sensory input");
                    }
                    if self.phase == Phase::Holding {
                        self.start_cycle(&mut out);
                    }
                }
                SupervisorAction::Close => {
                    self.supervisor = None;
                    out.push(Directive::CloseSupervisor);
                    self.resume_free_running(&mut out);
                }
                SupervisorAction::Shutdown => out.extend(self.shutdown()),
            }
        }
        Ok(out)
    }

    pub fn on_supervisor_lost(&mut self) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.supervisor.take().is_some() {
            tracing::warn!("Simulation link lost; continuing without it");
            self.resume_free_running(&mut out);
        }
        out
    }

    fn resume_free_running(&mut self, out: &mut Vec<Directive>) {
        if self.phase == Phase::Holding {
            self.start_cycle(out);
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn on_chunk(&mut self, conn: ConnId, chunk: Chunk) -> Result<Vec<Directive>, CoordinatorError> {
        if chunk.kind.family() == KindFamily::Simulation {
            return Err(ProtocolError::WrongLink {
                kind: chunk.kind,
                link: "subsystem",
            }
            .into());
        }
        if chunk.kind == ChunkKind::Join {
            return self.on_join(conn, &chunk);
        }

        let identity = self
            .registry
            .identity_of(&conn)
            .ok_or(LifecycleError::NotJoined { kind: chunk.kind })?
            .to_string();
        if chunk.sender != identity {
            return Err(LifecycleError::SenderMismatch {
                claimed: chunk.sender,
                bound: identity,
            }
            .into());
        }

        match chunk.kind {
            ChunkKind::Ready => self.on_ready(&identity),
            ChunkKind::ActionExternal | ChunkKind::ActionWorkingMemory | ChunkKind::ActionGoalState => {
                self.on_action(conn, &identity, chunk)
            }
            ChunkKind::End => self.on_end(&identity, &chunk),
            ChunkKind::Dying => {
                self.registry.advance(&identity, PeerEvent::Dying)?;
                Ok(Vec::new())
            }
            ChunkKind::Dead => {
                tracing::info!(peer = %identity, "Peer is dead");
                Ok(self.drop_peer(conn, true))
            }
            kind => Err(ProtocolError::Unexpected {
                kind,
                sender: identity,
            }
            .into()),
        }
    }

    fn on_join(&mut self, conn: ConnId, chunk: &Chunk) -> Result<Vec<Directive>, CoordinatorError> {
        if chunk.sender.trim().is_empty() {
            return Err(ProtocolError::MissingField("sender").into());
        }
        self.registry.register(&chunk.sender, conn)?;
        let joined = self
            .namer
            .chunk(ChunkKind::Joined, COORDINATOR_ID, &chunk.sender, PRE_JOIN_TIC);
        Ok(vec![Directive::Send {
            conn,
            message: joined.into(),
        }])
    }

    fn on_ready(&mut self, identity: &str) -> Result<Vec<Directive>, CoordinatorError> {
        self.registry.advance(identity, PeerEvent::Ready)?;

        let mut out = Vec::new();
        if !self.registry.is_required(identity) {
            tracing::debug!(peer = %identity, "Optional subsystem ready");
            return Ok(out);
        }
        match self.phase {
            Phase::Gathering => self.maybe_start(&mut out),
            Phase::Running | Phase::Holding => {
                if self.barrier.require(identity) {
                    tracing::info!(peer = %identity, next_tic = self.tic + 1, "Required subsystem back; counted from next cycle");
                }
            }
            Phase::ShuttingDown => {}
        }
        Ok(out)
    }

    fn on_action(
        &mut self,
        conn: ConnId,
        identity: &str,
        chunk: Chunk,
    ) -> Result<Vec<Directive>, CoordinatorError> {
        self.check_cycle_chunk(identity, &chunk)?;

        let ack = self
            .namer
            .chunk(ChunkKind::Ack, COORDINATOR_ID, identity, chunk.tic)
            .acknowledging(&chunk);
        tracing::debug!(peer = %identity, tic = chunk.tic, kind = %chunk.kind, action = %chunk.name, "Action accepted");
        self.pending.push(chunk);
        Ok(vec![Directive::Send {
            conn,
            message: ack.into(),
        }])
    }

    fn on_end(&mut self, identity: &str, chunk: &Chunk) -> Result<Vec<Directive>, CoordinatorError> {
        self.check_cycle_chunk(identity, chunk)?;

        if self.barrier.satisfy(identity) {
            tracing::debug!(peer = %identity, tic = chunk.tic, outstanding = self.barrier.outstanding().len(), "END");
        } else {
            tracing::debug!(peer = %identity, tic = chunk.tic, "END ignored; not outstanding");
        }

        let mut out = Vec::new();
        if self.barrier.is_released() {
            self.advance(&mut out);
        }
        Ok(out)
    }

    /// Content for the running cycle must come from a READY peer and carry
    /// the current tic.
    fn check_cycle_chunk(&self, identity: &str, chunk: &Chunk) -> Result<(), CoordinatorError> {
        if self.registry.state_of(identity) != PeerState::Ready {
            return Err(LifecycleError::NotReady {
                identity: identity.to_string(),
                kind: chunk.kind,
            }
            .into());
        }
        if self.phase != Phase::Running || chunk.tic != self.tic {
            return Err(ProtocolError::StaleTic {
                got: chunk.tic,
                current: self.tic,
            }
            .into());
        }
        Ok(())
    }

    fn drop_peer(&mut self, conn: ConnId, close: bool) -> Vec<Directive> {
        let mut out = Vec::new();
        if close {
            out.push(Directive::Close { conn });
        }
        let Some(record) = self.registry.remove_handle(&conn, &mut self.barrier) else {
            return out;
        };
        tracing::info!(peer = %record.label(), state = %record.state, "Peer removed");

        match self.phase {
            Phase::Running if record.required => {
                if self.barrier.required().is_empty() {
                    self.fall_back();
                } else if self.barrier.is_released() {
                    tracing::warn!(
                        tic = self.tic,
                        lost = %record.label(),
                        accepted = self.pending.len(),
                        "Advancing without lost subsystem"
                    );
                    self.advance(&mut out);
                }
            }
            Phase::Holding if record.required && self.barrier.required().is_empty() => {
                tracing::warn!(tic = self.tic, "No required subsystem left while holding");
                self.phase = Phase::Gathering;
            }
            Phase::ShuttingDown if self.registry.is_empty() => out.push(Directive::Stop),
            _ => {}
        }
        out
    }

    // ── Cycle transitions ───────────────────────────────────────────

    fn maybe_start(&mut self, out: &mut Vec<Directive>) {
        if self.phase != Phase::Gathering || !self.registry.all_required_ready() {
            return;
        }
        tracing::info!(tic = self.tic, required = ?self.registry.required(), "All required subsystems ready");
        self.start_cycle(out);
    }

    /// Arm the barrier for the current tic and broadcast its stimulus, or
    /// hold until the simulation supplies one.
    fn start_cycle(&mut self, out: &mut Vec<Directive>) {
        if self.max_cycles.is_some_and(|max| self.cycles_completed >= max) {
            tracing::info!(cycles = self.cycles_completed, "Cycle limit reached");
            out.extend(self.shutdown());
            return;
        }

        for identity in self.registry.ready_required() {
            self.barrier.require(identity);
        }
        if self.barrier.required().is_empty() {
            self.phase = Phase::Gathering;
            return;
        }

        let payload = if let Some(input) = self.queued_stimulus.take() {
            self.cycle_input = Some(input.clone());
            input
        } else if self.supervisor.as_ref().is_some_and(SupervisorSession::drives_cycles) {
            if self.phase != Phase::Holding {
                tracing::debug!(tic = self.tic, "Holding for sensory input");
            }
            self.phase = Phase::Holding;
            return;
        } else {
            self.stimulus.generate(&self.catalogue, self.tic)
        };

        self.phase = Phase::Running;
        self.barrier.arm(self.tic);
        self.deadline = Some((self.tic, Instant::now() + self.cycle_timeout));

        let stimulus = self
            .namer
            .chunk(ChunkKind::Stimulus, COORDINATOR_ID, "", self.tic)
            .with_payload(payload);

        let before = out.len();
        for (identity, record) in self.registry.joined() {
            if record.state == PeerState::Ready {
                out.push(Directive::Send {
                    conn: record.handle,
                    message: stimulus.readdressed(identity).into(),
                });
            }
        }
        tracing::debug!(tic = self.tic, stimulus = %stimulus.name, recipients = out.len() - before, "Stimulus broadcast");
    }

    /// Consume the released cycle: select, clear, bump the tic, then start
    /// the next one. The only place `tic` moves forward.
    fn advance(&mut self, out: &mut Vec<Directive>) {
        let completed = self.tic;
        let pending = std::mem::take(&mut self.pending);
        let selected = self.selector.select(completed, &pending);

        match &selected {
            Some(action) => tracing::info!(
                tic = completed,
                accepted = pending.len(),
                action = %action.name,
                from = %action.sender,
                "Cycle complete"
            ),
            None => tracing::info!(tic = completed, accepted = pending.len(), "Cycle complete; no action selected"),
        }

        self.cycles_completed += 1;
        self.tic += 1;
        self.deadline = None;
        self.barrier.disarm();

        // Only cycles driven by simulation input are reported back to it.
        if self.cycle_input.take().is_some() {
            if let Some(session) = self.supervisor.as_mut() {
                for chunk in session.report(&mut self.namer, completed, selected.as_ref()) {
                    out.push(Directive::Supervisor(chunk));
                }
            }
        }
        self.last_selection = selected;

        self.start_cycle(out);
    }

    /// No required subsystem left: abandon the cycle and wait for peers.
    /// The tic stays put, so the cycle reruns once they are back, with the
    /// same simulation input if it had one.
    fn fall_back(&mut self) {
        tracing::warn!(
            tic = self.tic,
            discarded = self.pending.len(),
            "No required subsystem left; abandoning cycle"
        );
        self.pending.clear();
        self.barrier.disarm();
        self.deadline = None;
        if let Some(input) = self.cycle_input.take() {
            if self.queued_stimulus.replace(input).is_some() {
                tracing::debug!("Dropping newer sensory input for the rerun cycle");
            }
        }
        self.phase = Phase::Gathering;
    }

    fn peer_label(&self, conn: &ConnId) -> String {
        self.registry
            .by_handle(conn)
            .map(|r| r.label().to_string())
            .unwrap_or_else(|| conn.to_string())
    }
}
