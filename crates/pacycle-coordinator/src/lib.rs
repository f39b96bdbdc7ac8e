//! pacycle coordinator.
//!
//! - [`coordinator`]: dispatch and cycle state, free of I/O
//! - [`selection`]: action selection policy applied to each completed cycle
//! - [`supervisor`]: session with the supervising simulation
//! - [`server`]: the tokio event loop that owns a coordinator

pub mod coordinator;
pub mod error;
pub mod selection;
pub mod server;
pub mod supervisor;

pub use coordinator::{AgentCoordinator, ConnId, CoordinatorConfig, Directive, Phase};
pub use error::CoordinatorError;
pub use selection::{ActionSelector, FirstExternal};
pub use server::{CoordinatorServer, RunSummary};
pub use supervisor::{SupervisorAction, SupervisorSession, SupervisorState};
