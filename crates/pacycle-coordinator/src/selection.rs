//! Action selection at the end of a cycle.

use pacycle_protocol::{Chunk, ChunkKind, Tic};

/// Chooses the action to carry out from a completed cycle's pending set.
///
/// `pending` holds exactly the actions accepted for `tic`, in arrival
/// order. Implementations must not keep state that leaks one cycle's
/// actions into another's selection.
pub trait ActionSelector: Send {
    fn select(&mut self, tic: Tic, pending: &[Chunk]) -> Option<Chunk>;
}

/// Picks the first ACTION-EXTERNAL that arrived.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstExternal;

impl ActionSelector for FirstExternal {
    fn select(&mut self, _tic: Tic, pending: &[Chunk]) -> Option<Chunk> {
        pending
            .iter()
            .find(|c| c.kind == ChunkKind::ActionExternal)
            .cloned()
    }
}
