use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::ACKED_KEY;
use crate::ProtocolError;

/// Perception-action cycle counter. `-1` is reserved for pre-join traffic.
pub type Tic = i64;

/// Dimension name -> value.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Which partition of the kind vocabulary a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindFamily {
    /// Cognitive content: stimuli, actions, conditions.
    Content,
    /// Coordinator <-> subsystem session control.
    Lifecycle,
    /// Coordinator <-> simulation link only.
    Simulation,
}

/// Closed set of chunk kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum ChunkKind {
    // ── Content ──
    Stimulus,
    WorkingMemory,
    GoalState,
    Input,
    ActionExternal,
    ActionWorkingMemory,
    ActionGoalState,
    Condition,

    // ── Simulation link ──
    AgentJoin,
    AgentJoined,
    AgentReady,
    AgentRunSs,
    AgentRun,
    AgentDie,
    AgentDying,
    AgentDead,
    AgentEnd,
    AgentGetSi,
    AgentSi,
    AgentAck,
    AgentNak,
    AgentResult,

    // ── Subsystem lifecycle ──
    Join,
    Joined,
    Ready,
    Ack,
    Nak,
    Die,
    Dying,
    Dead,
    End,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 31] = [
        ChunkKind::Stimulus,
        ChunkKind::WorkingMemory,
        ChunkKind::GoalState,
        ChunkKind::Input,
        ChunkKind::ActionExternal,
        ChunkKind::ActionWorkingMemory,
        ChunkKind::ActionGoalState,
        ChunkKind::Condition,
        ChunkKind::AgentJoin,
        ChunkKind::AgentJoined,
        ChunkKind::AgentReady,
        ChunkKind::AgentRunSs,
        ChunkKind::AgentRun,
        ChunkKind::AgentDie,
        ChunkKind::AgentDying,
        ChunkKind::AgentDead,
        ChunkKind::AgentEnd,
        ChunkKind::AgentGetSi,
        ChunkKind::AgentSi,
        ChunkKind::AgentAck,
        ChunkKind::AgentNak,
        ChunkKind::AgentResult,
        ChunkKind::Join,
        ChunkKind::Joined,
        ChunkKind::Ready,
        ChunkKind::Ack,
        ChunkKind::Nak,
        ChunkKind::Die,
        ChunkKind::Dying,
        ChunkKind::Dead,
        ChunkKind::End,
    ];

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Stimulus => "STIMULUS",
            ChunkKind::WorkingMemory => "WORKING-MEMORY",
            ChunkKind::GoalState => "GOAL-STATE",
            ChunkKind::Input => "INPUT",
            ChunkKind::ActionExternal => "ACTION-EXTERNAL",
            ChunkKind::ActionWorkingMemory => "ACTION-WORKING-MEMORY",
            ChunkKind::ActionGoalState => "ACTION-GOAL-STATE",
            ChunkKind::Condition => "CONDITION",
            ChunkKind::AgentJoin => "AGENT_JOIN",
            ChunkKind::AgentJoined => "AGENT_JOINED",
            ChunkKind::AgentReady => "AGENT_READY",
            ChunkKind::AgentRunSs => "AGENT_RUN_SS",
            ChunkKind::AgentRun => "AGENT_RUN",
            ChunkKind::AgentDie => "AGENT_DIE",
            ChunkKind::AgentDying => "AGENT_DYING",
            ChunkKind::AgentDead => "AGENT_DEAD",
            ChunkKind::AgentEnd => "AGENT_END",
            ChunkKind::AgentGetSi => "AGENT_GET_SI",
            ChunkKind::AgentSi => "AGENT_SI",
            ChunkKind::AgentAck => "AGENT_ACK",
            ChunkKind::AgentNak => "AGENT_NAK",
            ChunkKind::AgentResult => "AGENT_RESULT",
            ChunkKind::Join => "JOIN",
            ChunkKind::Joined => "JOINED",
            ChunkKind::Ready => "READY",
            ChunkKind::Ack => "ACK",
            ChunkKind::Nak => "NAK",
            ChunkKind::Die => "DIE",
            ChunkKind::Dying => "DYING",
            ChunkKind::Dead => "DEAD",
            ChunkKind::End => "END",
        }
    }

    /// Numeric code used by the legacy protocol. Content kinds sit below
    /// 60, the simulation link uses 61..=75, subsystem lifecycle 91..=999.
    pub fn code(&self) -> u16 {
        match self {
            ChunkKind::Stimulus => 1,
            ChunkKind::WorkingMemory => 2,
            ChunkKind::GoalState => 3,
            ChunkKind::Input => 4,
            ChunkKind::ActionExternal => 5,
            ChunkKind::ActionWorkingMemory => 6,
            ChunkKind::ActionGoalState => 7,
            ChunkKind::Condition => 11,
            ChunkKind::AgentJoin => 61,
            ChunkKind::AgentJoined => 62,
            ChunkKind::AgentReady => 63,
            ChunkKind::AgentRunSs => 64,
            ChunkKind::AgentRun => 65,
            ChunkKind::AgentDie => 66,
            ChunkKind::AgentDying => 67,
            ChunkKind::AgentDead => 68,
            ChunkKind::AgentEnd => 69,
            ChunkKind::AgentGetSi => 71,
            ChunkKind::AgentSi => 72,
            ChunkKind::AgentAck => 73,
            ChunkKind::AgentNak => 74,
            ChunkKind::AgentResult => 75,
            ChunkKind::Join => 91,
            ChunkKind::Joined => 92,
            ChunkKind::Ready => 93,
            ChunkKind::Ack => 94,
            ChunkKind::Nak => 95,
            ChunkKind::Die => 96,
            ChunkKind::Dying => 97,
            ChunkKind::Dead => 98,
            ChunkKind::End => 999,
        }
    }

    pub fn family(&self) -> KindFamily {
        match self.code() {
            0..=60 => KindFamily::Content,
            61..=90 => KindFamily::Simulation,
            _ => KindFamily::Lifecycle,
        }
    }

    /// ACTION-EXTERNAL, ACTION-WORKING-MEMORY or ACTION-GOAL-STATE.
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            ChunkKind::ActionExternal | ChunkKind::ActionWorkingMemory | ChunkKind::ActionGoalState
        )
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChunkKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

impl From<ChunkKind> for &'static str {
    fn from(kind: ChunkKind) -> Self {
        kind.as_str()
    }
}

impl TryFrom<String> for ChunkKind {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The unit of exchange between the coordinator and its peers.
///
/// A chunk is built by whichever side originates it, encoded once, and
/// consumed by the receiving state machine. It is never mutated after send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub kind: ChunkKind,
    /// `<origin-prefix><counter>`, unique within the originating process.
    pub name: String,
    pub sender: String,
    pub receiver: String,
    pub tic: Tic,
    #[serde(default)]
    pub payload: Payload,
    /// Free-text annotation. Never interpreted by the protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl Chunk {
    pub fn new(
        kind: ChunkKind,
        name: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        tic: Tic,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            sender: sender.into(),
            receiver: receiver.into(),
            tic,
            payload: Payload::new(),
            log: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    /// Mark this ACK or NAK as the answer to `acked`.
    pub fn acknowledging(mut self, acked: &Chunk) -> Self {
        self.payload
            .insert(ACKED_KEY.into(), serde_json::Value::String(acked.name.clone()));
        self
    }

    /// Name of the chunk an acknowledgement answers, if it names one.
    pub fn acked_name(&self) -> Option<&str> {
        self.payload.get(ACKED_KEY).and_then(serde_json::Value::as_str)
    }

    /// Copy addressed to a different receiver, for broadcasts.
    pub fn readdressed(&self, receiver: &str) -> Self {
        Self {
            receiver: receiver.to_string(),
            ..self.clone()
        }
    }
}

/// Issues chunk names for one process: a fixed prefix plus a counter that
/// starts at 1 and never resets.
#[derive(Debug, Clone)]
pub struct ChunkNamer {
    prefix: String,
    issued: u64,
}

impl ChunkNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_name(&mut self) -> String {
        self.issued += 1;
        format!("{}{}", self.prefix, self.issued)
    }

    /// Build a fresh chunk with the next name.
    pub fn chunk(&mut self, kind: ChunkKind, sender: &str, receiver: &str, tic: Tic) -> Chunk {
        let name = self.next_name();
        Chunk::new(kind, name, sender, receiver, tic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgement_names_its_chunk() {
        let action = Chunk::new(ChunkKind::ActionExternal, "ACS-3", "ACS", "AGENT", 2);
        let ack = Chunk::new(ChunkKind::Ack, "Agent-8", "AGENT", "ACS", 2).acknowledging(&action);
        assert_eq!(ack.acked_name(), Some("ACS-3"));
        assert_eq!(ack.log, None);
        assert_eq!(Chunk::new(ChunkKind::Ack, "Agent-9", "AGENT", "ACS", 2).acked_name(), None);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ChunkKind::ALL {
            assert_eq!(kind.as_str().parse::<ChunkKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_families_are_disjoint_ranges() {
        assert_eq!(ChunkKind::Stimulus.family(), KindFamily::Content);
        assert_eq!(ChunkKind::Condition.family(), KindFamily::Content);
        assert_eq!(ChunkKind::AgentJoin.family(), KindFamily::Simulation);
        assert_eq!(ChunkKind::AgentResult.family(), KindFamily::Simulation);
        assert_eq!(ChunkKind::Join.family(), KindFamily::Lifecycle);
        assert_eq!(ChunkKind::End.family(), KindFamily::Lifecycle);

        let sim = ChunkKind::ALL
            .iter()
            .filter(|k| k.family() == KindFamily::Simulation)
            .count();
        assert_eq!(sim, 14);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            "BOGUS".parse::<ChunkKind>(),
            Err(ProtocolError::UnknownKind("BOGUS".into()))
        );
    }

    #[test]
    fn test_namer_is_monotonic() {
        let mut namer = ChunkNamer::new("ACS-");
        assert_eq!(namer.next_name(), "ACS-1");
        assert_eq!(namer.next_name(), "ACS-2");
        let c = namer.chunk(ChunkKind::Join, "ACS", "AGENT", -1);
        assert_eq!(c.name, "ACS-3");
        assert!(c.payload.is_empty());
    }

    #[test]
    fn test_readdressed_keeps_everything_else() {
        let mut payload = Payload::new();
        payload.insert("color".into(), serde_json::json!("red"));
        let c = Chunk::new(ChunkKind::Stimulus, "Agent-4", "AGENT", "*", 3).with_payload(payload);
        let r = c.readdressed("IDN");
        assert_eq!(r.receiver, "IDN");
        assert_eq!(r.name, c.name);
        assert_eq!(r.payload, c.payload);
        assert_eq!(r.tic, 3);
    }
}
