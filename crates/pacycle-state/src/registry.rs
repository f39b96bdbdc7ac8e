//! Subsystem registry.
//!
//! Every accepted connection is first recorded as *welcomed*, with no
//! identity. A JOIN binds an identity to the connection; from then on the
//! peer is addressed by identity. The registry is generic over the
//! connection handle so the coordinator can key it by whatever it uses to
//! reach a peer's writer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use thiserror::Error;

use pacycle_protocol::ChunkKind;

use crate::barrier::CycleBarrier;

/// Lifecycle of one peer, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Welcomed,
    Joined,
    Ready,
    Dying,
    /// Terminal. Records in this state are no longer held.
    Disconnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Welcomed => "welcomed",
            Self::Joined => "joined",
            Self::Ready => "ready",
            Self::Dying => "dying",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Join,
    Ready,
    /// The coordinator ordered the peer to shut down.
    Die,
    Dying,
    Dead,
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Join => "JOIN",
            Self::Ready => "READY",
            Self::Die => "DIE",
            Self::Dying => "DYING",
            Self::Dead => "DEAD",
        };
        write!(f, "{s}")
    }
}

impl PeerState {
    /// Next state for `event`, or `None` if the event is illegal here.
    pub fn on(self, event: PeerEvent) -> Option<PeerState> {
        use PeerEvent as E;
        use PeerState as S;
        match (self, event) {
            (S::Disconnected, _) => None,
            (_, E::Dead) => Some(S::Disconnected),
            (S::Welcomed, E::Join) => Some(S::Joined),
            (S::Joined, E::Ready) => Some(S::Ready),
            (S::Joined | S::Ready, E::Die | E::Dying) => Some(S::Dying),
            (S::Dying, E::Dying) => Some(S::Dying),
            _ => None,
        }
    }
}

/// Message valid on the wire but illegal for the peer's current state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("no peer registered as {0}")]
    UnknownPeer(String),

    #[error("identity {0} is already bound to another connection")]
    DuplicateIdentity(String),

    #[error("{event} is illegal for {identity} in state {state}")]
    IllegalTransition {
        identity: String,
        state: PeerState,
        event: PeerEvent,
    },

    #[error("{kind} before JOIN")]
    NotJoined { kind: ChunkKind },

    #[error("{kind} from {identity} before READY")]
    NotReady { identity: String, kind: ChunkKind },

    #[error("chunk claims sender {claimed} on the connection bound to {bound}")]
    SenderMismatch { claimed: String, bound: String },
}

#[derive(Debug, Clone)]
pub struct PeerRecord<H> {
    pub identity: Option<String>,
    pub handle: H,
    pub state: PeerState,
    /// Whether this identity counts toward the cycle barrier.
    pub required: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl<H> PeerRecord<H> {
    fn welcomed(handle: H) -> Self {
        let now = Utc::now();
        Self {
            identity: None,
            handle,
            state: PeerState::Welcomed,
            required: false,
            connected_at: now,
            last_seen: now,
        }
    }

    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or("<unjoined>")
    }
}

pub struct SubsystemRegistry<H> {
    peers: HashMap<H, PeerRecord<H>>,
    identities: BTreeMap<String, H>,
    required: BTreeSet<String>,
}

impl<H> SubsystemRegistry<H>
where
    H: Clone + Eq + Hash + fmt::Debug,
{
    /// `required` names the identities that count toward the barrier once
    /// they join.
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: HashMap::new(),
            identities: BTreeMap::new(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Record a freshly accepted connection.
    pub fn welcome(&mut self, handle: H) {
        tracing::debug!(conn = ?handle, "Peer welcomed");
        self.peers
            .insert(handle.clone(), PeerRecord::welcomed(handle));
    }

    /// Bind `identity` to `handle` (the JOIN event). A handle that was never
    /// welcomed is welcomed implicitly.
    pub fn register(&mut self, identity: &str, handle: H) -> Result<PeerState, LifecycleError> {
        if let Some(existing) = self.identities.get(identity) {
            if *existing != handle {
                return Err(LifecycleError::DuplicateIdentity(identity.to_string()));
            }
        }

        let required = self.required.contains(identity);
        let record = self
            .peers
            .entry(handle.clone())
            .or_insert_with(|| PeerRecord::welcomed(handle.clone()));

        let next = record
            .state
            .on(PeerEvent::Join)
            .ok_or_else(|| LifecycleError::IllegalTransition {
                identity: identity.to_string(),
                state: record.state,
                event: PeerEvent::Join,
            })?;

        record.identity = Some(identity.to_string());
        record.state = next;
        record.required = required;
        record.last_seen = Utc::now();
        self.identities.insert(identity.to_string(), handle);

        tracing::info!(peer = %identity, required, "Peer joined");
        Ok(next)
    }

    /// Apply a lifecycle event. `Dead` removes the record and yields
    /// `Disconnected`; use [`remove`](Self::remove) when a barrier must
    /// also be updated.
    pub fn advance(&mut self, identity: &str, event: PeerEvent) -> Result<PeerState, LifecycleError> {
        let handle = self
            .identities
            .get(identity)
            .ok_or_else(|| LifecycleError::UnknownPeer(identity.to_string()))?;
        let record = self
            .peers
            .get_mut(handle)
            .ok_or_else(|| LifecycleError::UnknownPeer(identity.to_string()))?;

        let next = record
            .state
            .on(event)
            .ok_or_else(|| LifecycleError::IllegalTransition {
                identity: identity.to_string(),
                state: record.state,
                event,
            })?;

        tracing::debug!(peer = %identity, from = %record.state, to = %next, %event, "Peer transition");

        if next == PeerState::Disconnected {
            let handle = handle.clone();
            self.peers.remove(&handle);
            self.identities.remove(identity);
        } else {
            record.state = next;
            record.last_seen = Utc::now();
        }
        Ok(next)
    }

    /// Drop the peer bound to `identity` and evict it from `barrier`.
    pub fn remove(&mut self, identity: &str, barrier: &mut CycleBarrier) -> Option<PeerRecord<H>> {
        let handle = self.identities.remove(identity)?;
        let record = self.peers.remove(&handle);
        if barrier.evict(identity) {
            tracing::warn!(peer = %identity, tic = ?barrier.tic(), "Evicted outstanding peer from barrier");
        }
        record
    }

    /// Drop whatever is recorded for `handle`, bound or not.
    pub fn remove_handle(&mut self, handle: &H, barrier: &mut CycleBarrier) -> Option<PeerRecord<H>> {
        let identity = self.peers.get(handle)?.identity.clone();
        match identity {
            Some(identity) => self.remove(&identity, barrier),
            None => self.peers.remove(handle),
        }
    }

    pub fn touch(&mut self, handle: &H) {
        if let Some(record) = self.peers.get_mut(handle) {
            record.last_seen = Utc::now();
        }
    }

    pub fn get(&self, identity: &str) -> Option<&PeerRecord<H>> {
        self.identities.get(identity).and_then(|h| self.peers.get(h))
    }

    pub fn by_handle(&self, handle: &H) -> Option<&PeerRecord<H>> {
        self.peers.get(handle)
    }

    pub fn identity_of(&self, handle: &H) -> Option<&str> {
        self.peers.get(handle)?.identity.as_deref()
    }

    pub fn handle_of(&self, identity: &str) -> Option<&H> {
        self.identities.get(identity)
    }

    pub fn state_of(&self, identity: &str) -> PeerState {
        self.get(identity)
            .map(|r| r.state)
            .unwrap_or(PeerState::Disconnected)
    }

    pub fn is_required(&self, identity: &str) -> bool {
        self.required.contains(identity)
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// True when every required identity is joined and READY.
    pub fn all_required_ready(&self) -> bool {
        self.required
            .iter()
            .all(|id| self.state_of(id) == PeerState::Ready)
    }

    /// Required identities currently READY, in identity order.
    pub fn ready_required(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|id| self.state_of(id) == PeerState::Ready)
            .cloned()
            .collect()
    }

    /// Bound peers in identity order.
    pub fn joined(&self) -> impl Iterator<Item = (&str, &PeerRecord<H>)> {
        self.identities
            .iter()
            .filter_map(|(id, h)| self.peers.get(h).map(|r| (id.as_str(), r)))
    }

    pub fn handles(&self) -> impl Iterator<Item = &H> {
        self.peers.keys()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
