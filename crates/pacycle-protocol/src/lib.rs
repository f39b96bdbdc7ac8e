//! pacycle protocol - chunk data model and wire format
//!
//! Defines the typed message ("chunk") exchanged between an agent
//! coordinator and its subsystem workers, the newline-framed wire
//! encoding, and the read-only agent context (dimension catalogue,
//! simulation endpoint, per-agent parameters) both sides load at startup.

pub mod chunk;
pub mod codec;
pub mod constants;
pub mod context;
pub mod dimension;
pub mod error;
pub mod generator;

pub use chunk::*;
pub use codec::*;
pub use constants::*;
pub use context::{AgentContext, AgentSettings, ConfigProvider, SimulationEndpoint, TomlConfigProvider};
pub use dimension::{Dimension, DimensionCatalogue, DimensionKind};
pub use error::*;
pub use generator::{ActionGenerator, RandomGenerator, ScriptedGenerator, StimulusGenerator};
