//! Coordinator-side peer and cycle state.
//!
//! - [`registry`]: every connected peer, its identity binding and lifecycle
//! - [`barrier`]: the set of required subsystems that must signal END
//!   before a cycle may advance

pub mod barrier;
pub mod registry;

pub use barrier::CycleBarrier;
pub use registry::{LifecycleError, PeerEvent, PeerRecord, PeerState, SubsystemRegistry};
