//! Cycle barrier.
//!
//! Holds the subsystems that must signal END before the coordinator may
//! advance, and which of them are still outstanding for the armed tic.
//! The barrier never advances the tic itself.

use std::collections::BTreeSet;

use pacycle_protocol::Tic;

#[derive(Debug, Clone, Default)]
pub struct CycleBarrier {
    required: BTreeSet<String>,
    /// Always a subset of `required`.
    outstanding: BTreeSet<String>,
    tic: Option<Tic>,
}

impl CycleBarrier {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            outstanding: BTreeSet::new(),
            tic: None,
        }
    }

    /// Start waiting on every required identity for `tic`.
    pub fn arm(&mut self, tic: Tic) {
        self.outstanding = self.required.clone();
        self.tic = Some(tic);
        tracing::trace!(tic, required = self.required.len(), "Barrier armed");
    }

    /// Forget the armed tic without releasing.
    pub fn disarm(&mut self) {
        self.outstanding.clear();
        self.tic = None;
    }

    /// Mark `identity` as done. Returns true if it was outstanding;
    /// repeated or unknown identities are a no-op.
    pub fn satisfy(&mut self, identity: &str) -> bool {
        self.outstanding.remove(identity)
    }

    pub fn is_released(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Drop `identity` from both the required and outstanding sets.
    /// Returns true if it was still outstanding.
    pub fn evict(&mut self, identity: &str) -> bool {
        self.required.remove(identity);
        self.outstanding.remove(identity)
    }

    /// Add a required identity. Takes effect from the next `arm`.
    pub fn require(&mut self, identity: impl Into<String>) -> bool {
        self.required.insert(identity.into())
    }

    pub fn is_required(&self, identity: &str) -> bool {
        self.required.contains(identity)
    }

    pub fn is_outstanding(&self, identity: &str) -> bool {
        self.outstanding.contains(identity)
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn outstanding(&self) -> &BTreeSet<String> {
        &self.outstanding
    }

    /// Tic of the last `arm`, or `None` when disarmed.
    pub fn tic(&self) -> Option<Tic> {
        self.tic
    }

    pub fn is_armed(&self) -> bool {
        self.tic.is_some()
    }
}
