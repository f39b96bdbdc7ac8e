//! Worker-side protocol state machine.
//!
//! `SubsystemProtocol` is driven one inbound message at a time and returns
//! the effects to perform. It owns no I/O, so the async runner in
//! [`crate::worker`] and the tests drive the same code.
//!
//! Actions for a stimulus are delivered under pull-flow control: one
//! ACTION is sent, the next waits for its ACK, and END goes out only once
//! every action of the cycle has been acknowledged. An ACK or NAK counts
//! only if it names the action in flight and carries the cycle's tic.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

use pacycle_network::NetworkError;
use pacycle_protocol::{
    ActionGenerator, Chunk, ChunkKind, ChunkNamer, ControlString, DimensionCatalogue,
    KindFamily, ProtocolError, Tic, WireMessage, COORDINATOR_ID, PRE_JOIN_TIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Joining,
    Joined,
    Ready,
    Active,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{kind} not accepted while {state}")]
    OutOfState { kind: ChunkKind, state: WorkerState },

    #[error("control {control} not accepted while {state}")]
    UnexpectedControl {
        control: ControlString,
        state: WorkerState,
    },

    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}

/// What the runner must do after a message is handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Chunk),
    Close,
}

pub struct SubsystemProtocol<G> {
    identity: String,
    state: WorkerState,
    namer: ChunkNamer,
    catalogue: DimensionCatalogue,
    generator: G,
    /// Tic of the stimulus currently being answered.
    cycle_tic: Option<Tic>,
    /// Remaining actions for the cycle, followed by END.
    outbox: VecDeque<Chunk>,
    in_flight: Option<Chunk>,
    cycles_completed: u64,
    actions_acked: u64,
}

impl<G: ActionGenerator> SubsystemProtocol<G> {
    pub fn new(identity: impl Into<String>, catalogue: DimensionCatalogue, generator: G) -> Self {
        let identity = identity.into();
        Self {
            namer: ChunkNamer::new(format!("{identity}-")),
            identity,
            state: WorkerState::New,
            catalogue,
            generator,
            cycle_tic: None,
            outbox: VecDeque::new(),
            in_flight: None,
            cycles_completed: 0,
            actions_acked: 0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn cycle_tic(&self) -> Option<Tic> {
        self.cycle_tic
    }

    /// At most one action is ever unacknowledged.
    pub fn in_flight(&self) -> Option<&Chunk> {
        self.in_flight.as_ref()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn actions_acked(&self) -> u64 {
        self.actions_acked
    }

    pub fn handle(&mut self, message: WireMessage) -> Result<Vec<Effect>, SubsystemError> {
        match message {
            WireMessage::Control(control) => self.handle_control(control),
            WireMessage::Chunk(chunk) => self.handle_chunk(chunk),
        }
    }

    fn handle_control(&mut self, control: ControlString) -> Result<Vec<Effect>, SubsystemError> {
        match (control, self.state) {
            (ControlString::Welcome, WorkerState::New) => {
                self.state = WorkerState::Joining;
                tracing::debug!(identity = %self.identity, "Welcomed, joining");
                Ok(vec![self.lifecycle(ChunkKind::Join, PRE_JOIN_TIC)])
            }
            (ControlString::Die, _) => {
                tracing::info!(identity = %self.identity, "Channel closed by !DIE");
                self.state = WorkerState::Closed;
                Ok(vec![Effect::Close])
            }
            (control, state) => Err(SubsystemError::UnexpectedControl { control, state }),
        }
    }

    fn handle_chunk(&mut self, chunk: Chunk) -> Result<Vec<Effect>, SubsystemError> {
        if chunk.kind.family() == KindFamily::Simulation {
            return Err(ProtocolError::WrongLink {
                kind: chunk.kind,
                link: "subsystem",
            }
            .into());
        }

        match (chunk.kind, self.state) {
            (ChunkKind::Joined, WorkerState::Joining) => {
                self.state = WorkerState::Joined;
                let ready = self.lifecycle(ChunkKind::Ready, PRE_JOIN_TIC);
                self.state = WorkerState::Ready;
                tracing::info!(identity = %self.identity, "Joined, ready");
                Ok(vec![ready])
            }
            (ChunkKind::Stimulus, WorkerState::Ready | WorkerState::Active) => {
                Ok(self.on_stimulus(chunk))
            }
            (ChunkKind::Ack | ChunkKind::Nak, WorkerState::Active) => Ok(self.on_ack(&chunk)),
            (ChunkKind::Die, WorkerState::Closed) => Err(SubsystemError::OutOfState {
                kind: chunk.kind,
                state: self.state,
            }),
            (ChunkKind::Die, _) => {
                let tic = self.cycle_tic.unwrap_or(PRE_JOIN_TIC);
                let dying = self.lifecycle(ChunkKind::Dying, tic);
                let dead = self.lifecycle(ChunkKind::Dead, tic);
                self.outbox.clear();
                self.in_flight = None;
                self.state = WorkerState::Closed;
                tracing::info!(identity = %self.identity, "Shutting down on DIE");
                Ok(vec![dying, dead, Effect::Close])
            }
            (kind, state) => Err(SubsystemError::OutOfState { kind, state }),
        }
    }

    fn on_stimulus(&mut self, stimulus: Chunk) -> Vec<Effect> {
        if !self.outbox.is_empty() || self.in_flight.is_some() {
            tracing::warn!(
                identity = %self.identity,
                abandoned_tic = ?self.cycle_tic,
                remaining = self.outbox.len() + usize::from(self.in_flight.is_some()),
                "New stimulus before cycle finished; abandoning outbox"
            );
            self.outbox.clear();
            self.in_flight = None;
        }

        self.state = WorkerState::Active;
        let tic = stimulus.tic;
        self.cycle_tic = Some(tic);

        let actions = self
            .generator
            .actions(&self.catalogue, &stimulus.payload, tic);
        for (kind, payload) in actions {
            if !kind.is_action() {
                tracing::warn!(identity = %self.identity, %kind, "Generator produced a non-action kind; skipped");
                continue;
            }
            let chunk = self
                .namer
                .chunk(kind, &self.identity, COORDINATOR_ID, tic)
                .with_payload(payload);
            self.outbox.push_back(chunk);
        }
        let end = self.namer.chunk(ChunkKind::End, &self.identity, COORDINATOR_ID, tic);
        self.outbox.push_back(end);

        tracing::debug!(identity = %self.identity, tic, actions = self.outbox.len() - 1, "Stimulus received");
        self.pump()
    }

    fn on_ack(&mut self, ack: &Chunk) -> Vec<Effect> {
        let matches = self.in_flight.as_ref().is_some_and(|action| {
            Some(ack.tic) == self.cycle_tic && ack.acked_name() == Some(action.name.as_str())
        });
        if !matches {
            tracing::debug!(
                identity = %self.identity,
                tic = ack.tic,
                kind = %ack.kind,
                acked = ?ack.acked_name(),
                "Ignoring unmatched acknowledgement"
            );
            return Vec::new();
        }

        if let Some(action) = self.in_flight.take() {
            if ack.kind == ChunkKind::Nak {
                tracing::warn!(identity = %self.identity, action = %action.name, "Action refused");
            } else {
                self.actions_acked += 1;
            }
        }
        self.pump()
    }

    /// Send the next outbox entry unless an action is awaiting its ACK.
    fn pump(&mut self) -> Vec<Effect> {
        if self.in_flight.is_some() {
            return Vec::new();
        }
        match self.outbox.pop_front() {
            Some(chunk) if chunk.kind == ChunkKind::End => {
                self.cycles_completed += 1;
                vec![Effect::Send(chunk)]
            }
            Some(chunk) => {
                self.in_flight = Some(chunk.clone());
                vec![Effect::Send(chunk)]
            }
            None => Vec::new(),
        }
    }

    fn lifecycle(&mut self, kind: ChunkKind, tic: Tic) -> Effect {
        Effect::Send(self.namer.chunk(kind, &self.identity, COORDINATOR_ID, tic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacycle_protocol::{Payload, ScriptedGenerator};

    fn scripted(actions: usize) -> ScriptedGenerator {
        ScriptedGenerator {
            stimulus: Payload::new(),
            actions: (0..actions)
                .map(|i| {
                    let mut p = Payload::new();
                    p.insert("i".into(), serde_json::json!(i));
                    (ChunkKind::ActionExternal, p)
                })
                .collect(),
        }
    }

    fn from_agent(kind: ChunkKind, tic: Tic) -> WireMessage {
        Chunk::new(kind, "Agent-1", COORDINATOR_ID, "ACS", tic).into()
    }

    /// ACK from the coordinator for whatever `w` has in flight.
    fn ack(w: &SubsystemProtocol<ScriptedGenerator>, tic: Tic) -> WireMessage {
        let acked = w.in_flight().map(|c| c.name.clone()).unwrap_or_default();
        ack_named(&acked, tic)
    }

    fn ack_named(acked: &str, tic: Tic) -> WireMessage {
        let target = Chunk::new(ChunkKind::ActionExternal, acked, "ACS", COORDINATOR_ID, tic);
        Chunk::new(ChunkKind::Ack, "Agent-1", COORDINATOR_ID, "ACS", tic)
            .acknowledging(&target)
            .into()
    }

    fn sent(effects: &[Effect]) -> Vec<(ChunkKind, Tic)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(c) => Some((c.kind, c.tic)),
                Effect::Close => None,
            })
            .collect()
    }

    fn ready_worker(actions: usize) -> SubsystemProtocol<ScriptedGenerator> {
        let mut w = SubsystemProtocol::new("ACS", DimensionCatalogue::default(), scripted(actions));
        w.handle(ControlString::Welcome.into()).unwrap();
        w.handle(from_agent(ChunkKind::Joined, PRE_JOIN_TIC)).unwrap();
        w
    }

    #[test]
    fn test_join_handshake() {
        let mut w = SubsystemProtocol::new("ACS", DimensionCatalogue::default(), scripted(0));
        let join = w.handle(ControlString::Welcome.into()).unwrap();
        assert_eq!(sent(&join), vec![(ChunkKind::Join, PRE_JOIN_TIC)]);
        assert_eq!(w.state(), WorkerState::Joining);

        let ready = w.handle(from_agent(ChunkKind::Joined, PRE_JOIN_TIC)).unwrap();
        assert_eq!(sent(&ready), vec![(ChunkKind::Ready, PRE_JOIN_TIC)]);
        assert_eq!(w.state(), WorkerState::Ready);
    }

    #[test]
    fn test_chunk_names_use_identity_prefix() {
        let mut w = SubsystemProtocol::new("IDN", DimensionCatalogue::default(), scripted(0));
        let effects = w.handle(ControlString::Welcome.into()).unwrap();
        match &effects[0] {
            Effect::Send(c) => {
                assert_eq!(c.name, "IDN-1");
                assert_eq!(c.sender, "IDN");
                assert_eq!(c.receiver, COORDINATOR_ID);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn test_stimulus_before_join_is_rejected() {
        let mut w = SubsystemProtocol::new("ACS", DimensionCatalogue::default(), scripted(1));
        let err = w.handle(from_agent(ChunkKind::Stimulus, 0)).unwrap_err();
        assert!(matches!(
            err,
            SubsystemError::OutOfState { kind: ChunkKind::Stimulus, state: WorkerState::New }
        ));
    }

    #[test]
    fn test_pull_flow_one_action_at_a_time() {
        let mut w = ready_worker(2);

        let first = w.handle(from_agent(ChunkKind::Stimulus, 0)).unwrap();
        assert_eq!(sent(&first), vec![(ChunkKind::ActionExternal, 0)]);
        assert!(w.in_flight().is_some());

        let second = w.handle(ack(&w, 0)).unwrap();
        assert_eq!(sent(&second), vec![(ChunkKind::ActionExternal, 0)]);

        let end = w.handle(ack(&w, 0)).unwrap();
        assert_eq!(sent(&end), vec![(ChunkKind::End, 0)]);
        assert!(w.in_flight().is_none());
        assert_eq!(w.actions_acked(), 2);
        assert_eq!(w.cycles_completed(), 1);
    }

    #[test]
    fn test_no_actions_sends_end_immediately() {
        let mut w = ready_worker(0);
        let effects = w.handle(from_agent(ChunkKind::Stimulus, 4)).unwrap();
        assert_eq!(sent(&effects), vec![(ChunkKind::End, 4)]);
    }

    #[test]
    fn test_unmatched_ack_is_ignored() {
        let mut w = ready_worker(1);
        w.handle(from_agent(ChunkKind::Stimulus, 0)).unwrap();

        // Wrong tic.
        assert!(w.handle(ack(&w, 7)).unwrap().is_empty());
        assert!(w.in_flight().is_some());

        let acked = w.in_flight().map(|c| c.name.clone()).unwrap();
        w.handle(ack(&w, 0)).unwrap();
        // Nothing in flight any more.
        assert!(w.handle(ack_named(&acked, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_ack_for_another_chunk_is_ignored() {
        let mut w = ready_worker(2);
        w.handle(from_agent(ChunkKind::Stimulus, 0)).unwrap();
        let in_flight = w.in_flight().unwrap().name.clone();

        // Right tic, wrong chunk, and one that names nothing.
        assert!(w.handle(ack_named("ACS-99", 0)).unwrap().is_empty());
        assert!(w.handle(from_agent(ChunkKind::Ack, 0)).unwrap().is_empty());
        assert_eq!(w.in_flight().map(|c| c.name.as_str()), Some(in_flight.as_str()));
        assert_eq!(w.actions_acked(), 0);

        let next = w.handle(ack_named(&in_flight, 0)).unwrap();
        assert_eq!(sent(&next), vec![(ChunkKind::ActionExternal, 0)]);
        assert_eq!(w.actions_acked(), 1);
    }

    #[test]
    fn test_new_stimulus_abandons_outbox() {
        let mut w = ready_worker(3);
        w.handle(from_agent(ChunkKind::Stimulus, 0)).unwrap();

        let effects = w.handle(from_agent(ChunkKind::Stimulus, 1)).unwrap();
        assert_eq!(sent(&effects), vec![(ChunkKind::ActionExternal, 1)]);
        assert_eq!(w.cycle_tic(), Some(1));

        // An ACK for the abandoned action no longer matches.
        let abandoned = Chunk::new(ChunkKind::ActionExternal, "ACS-3", "ACS", COORDINATOR_ID, 0);
        let stale = Chunk::new(ChunkKind::Ack, "Agent-1", COORDINATOR_ID, "ACS", 0).acknowledging(&abandoned);
        assert!(w.handle(stale.into()).unwrap().is_empty());
        assert!(w.in_flight().is_some());
    }

    #[test]
    fn test_die_chunk_replies_dying_then_dead() {
        let mut w = ready_worker(0);
        let effects = w.handle(from_agent(ChunkKind::Die, 0)).unwrap();
        assert_eq!(
            sent(&effects),
            vec![(ChunkKind::Dying, PRE_JOIN_TIC), (ChunkKind::Dead, PRE_JOIN_TIC)]
        );
        assert_eq!(effects.last(), Some(&Effect::Close));
        assert_eq!(w.state(), WorkerState::Closed);
    }

    #[test]
    fn test_die_control_closes() {
        let mut w = ready_worker(0);
        let effects = w.handle(ControlString::Die.into()).unwrap();
        assert_eq!(effects, vec![Effect::Close]);
    }

    #[test]
    fn test_simulation_kind_is_wrong_link() {
        let mut w = ready_worker(0);
        let err = w.handle(from_agent(ChunkKind::AgentRun, 0)).unwrap_err();
        assert!(matches!(
            err,
            SubsystemError::Protocol(ProtocolError::WrongLink { kind: ChunkKind::AgentRun, .. })
        ));
    }
}
