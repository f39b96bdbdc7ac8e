//! Session with the supervising simulation process.
//!
//! The coordinator is a client on this link. It joins, then runs either a
//! single step (`AGENT_RUN_SS`) or a number of rounds (`AGENT_RUN`). Each
//! round it requests a sensory-input chunk (`AGENT_GET_SI`), acknowledges
//! it, runs one cycle on its payload and reports the selected action back
//! as `AGENT_RESULT`. While a session is open no cycle starts without such
//! an input.

use pacycle_protocol::{
    Chunk, ChunkKind, ChunkNamer, ControlString, KindFamily, Payload, ProtocolError, Tic,
    WireMessage, COORDINATOR_ID,
};

use crate::error::CoordinatorError;

/// Receiver used until the simulation identifies itself.
pub const SIMULATION_ID: &str = "SIMULATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Joining,
    /// Joined, no run in progress.
    Idle,
    Running,
    Closed,
}

/// Effects of one supervisor message on the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    Send(Chunk),
    /// Use this payload for the next stimulus instead of the generator.
    QueueStimulus(Payload),
    /// The link closed itself (`!DIE`).
    Close,
    /// The simulation ordered the whole agent to stop.
    Shutdown,
}

#[derive(Debug)]
pub struct SupervisorSession {
    agent_name: String,
    peer: String,
    state: SupervisorState,
    /// `None` while running without a round limit.
    rounds_left: Option<u64>,
    /// An `AGENT_GET_SI` is unanswered.
    awaiting_input: bool,
    results_sent: u64,
}

impl SupervisorSession {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            peer: SIMULATION_ID.to_string(),
            state: SupervisorState::Connecting,
            rounds_left: None,
            awaiting_input: false,
            results_sent: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn results_sent(&self) -> u64 {
        self.results_sent
    }

    pub fn awaiting_input(&self) -> bool {
        self.awaiting_input
    }

    /// Whether cycles wait for this session's input.
    pub fn drives_cycles(&self) -> bool {
        self.state != SupervisorState::Closed
    }

    /// AGENT_JOIN, sent once per session as soon as the link is up.
    pub fn on_connect(&mut self, namer: &mut ChunkNamer, tic: Tic) -> Option<Chunk> {
        if self.state != SupervisorState::Connecting {
            return None;
        }
        self.state = SupervisorState::Joining;
        let mut payload = Payload::new();
        payload.insert("agent".into(), serde_json::json!(self.agent_name));
        Some(self.chunk(namer, ChunkKind::AgentJoin, tic).with_payload(payload))
    }

    pub fn handle(
        &mut self,
        message: WireMessage,
        namer: &mut ChunkNamer,
        tic: Tic,
    ) -> Result<Vec<SupervisorAction>, CoordinatorError> {
        let chunk = match message {
            WireMessage::Control(ControlString::Welcome) => {
                return Ok(self
                    .on_connect(namer, tic)
                    .map(SupervisorAction::Send)
                    .into_iter()
                    .collect());
            }
            WireMessage::Control(ControlString::Die) => {
                self.state = SupervisorState::Closed;
                return Ok(vec![SupervisorAction::Close]);
            }
            WireMessage::Chunk(chunk) => chunk,
        };

        if chunk.kind.family() != KindFamily::Simulation {
            return Err(ProtocolError::WrongLink {
                kind: chunk.kind,
                link: "simulation",
            }
            .into());
        }

        let actions = match (chunk.kind, self.state) {
            (ChunkKind::AgentJoined, SupervisorState::Joining) => {
                self.peer = chunk.sender.clone();
                self.state = SupervisorState::Idle;
                tracing::info!(simulation = %self.peer, "Joined simulation");
                vec![SupervisorAction::Send(self.chunk(namer, ChunkKind::AgentReady, tic))]
            }
            (ChunkKind::AgentRunSs | ChunkKind::AgentRun, SupervisorState::Idle | SupervisorState::Running) => {
                self.rounds_left = if chunk.kind == ChunkKind::AgentRunSs {
                    Some(1)
                } else {
                    chunk.payload.get("rounds").and_then(|v| v.as_u64())
                };
                self.state = SupervisorState::Running;
                tracing::info!(rounds = ?self.rounds_left, "Simulation run started");
                if self.awaiting_input {
                    return Ok(Vec::new());
                }
                self.awaiting_input = true;
                vec![SupervisorAction::Send(self.chunk(namer, ChunkKind::AgentGetSi, tic))]
            }
            (ChunkKind::AgentSi, SupervisorState::Running) if self.awaiting_input => {
                tracing::debug!(si = %chunk.name, dimensions = chunk.payload.len(), "Sensory input received");
                self.awaiting_input = false;
                let ack = self.chunk(namer, ChunkKind::AgentAck, tic).acknowledging(&chunk);
                vec![
                    SupervisorAction::Send(ack),
                    SupervisorAction::QueueStimulus(chunk.payload),
                ]
            }
            (ChunkKind::AgentSi, state) if state != SupervisorState::Closed => {
                tracing::warn!(si = %chunk.name, ?state, "Sensory input not requested; refused");
                let nak = self.chunk(namer, ChunkKind::AgentNak, tic).acknowledging(&chunk);
                vec![SupervisorAction::Send(nak)]
            }
            (ChunkKind::AgentAck | ChunkKind::AgentNak, _) => {
                tracing::trace!(kind = %chunk.kind, "Simulation acknowledgement");
                Vec::new()
            }
            (ChunkKind::AgentEnd, _) => {
                self.state = SupervisorState::Idle;
                self.rounds_left = None;
                self.awaiting_input = false;
                Vec::new()
            }
            (ChunkKind::AgentDie, state) if state != SupervisorState::Closed => {
                let dying = self.chunk(namer, ChunkKind::AgentDying, tic);
                let dead = self.chunk(namer, ChunkKind::AgentDead, tic);
                self.state = SupervisorState::Closed;
                tracing::info!("Simulation ordered shutdown");
                vec![
                    SupervisorAction::Send(dying),
                    SupervisorAction::Send(dead),
                    SupervisorAction::Shutdown,
                ]
            }
            (kind, _) => {
                return Err(ProtocolError::Unexpected {
                    kind,
                    sender: chunk.sender,
                }
                .into())
            }
        };
        Ok(actions)
    }

    /// Report the outcome of cycle `tic`, which ran on this session's
    /// input. While a run is in progress this also requests the next
    /// sensory input, or ends the run when its rounds are used up.
    pub fn report(&mut self, namer: &mut ChunkNamer, tic: Tic, selected: Option<&Chunk>) -> Vec<Chunk> {
        if !matches!(self.state, SupervisorState::Idle | SupervisorState::Running) {
            return Vec::new();
        }

        let mut result = self.chunk(namer, ChunkKind::AgentResult, tic);
        if let Some(action) = selected {
            result.payload = action.payload.clone();
            result.log = Some(format!("{} {} from {}", action.kind, action.name, action.sender));
        }
        self.results_sent += 1;
        let mut out = vec![result];

        if self.state == SupervisorState::Running {
            if let Some(left) = self.rounds_left.as_mut() {
                *left = left.saturating_sub(1);
            }
            if self.rounds_left == Some(0) {
                self.state = SupervisorState::Idle;
                self.rounds_left = None;
                out.push(self.chunk(namer, ChunkKind::AgentEnd, tic));
            } else {
                self.awaiting_input = true;
                out.push(self.chunk(namer, ChunkKind::AgentGetSi, tic));
            }
        }
        out
    }

    fn chunk(&self, namer: &mut ChunkNamer, kind: ChunkKind, tic: Tic) -> Chunk {
        namer.chunk(kind, COORDINATOR_ID, &self.peer, tic)
    }
}
