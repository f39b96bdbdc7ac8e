//! Subsystem worker for the pacycle coordination protocol.
//!
//! A subsystem joins the coordinator, waits for each cycle's stimulus and
//! answers it with action recommendations followed by END.

pub mod protocol;
pub mod worker;

pub use protocol::{Effect, SubsystemError, SubsystemProtocol, WorkerState};
pub use worker::{run_worker, WorkerSummary};
