//! Stimulus and action generation.
//!
//! The coordination core treats both as opaque functions of the dimension
//! catalogue and the tic. `RandomGenerator` is the reference implementation:
//! it samples each dimension uniformly and, for actions, draws a random mix
//! of goal-state, working-memory and external actions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chunk::{ChunkKind, Payload, Tic};
use crate::dimension::DimensionCatalogue;

/// Produces the payload of the STIMULUS broadcast for a cycle.
pub trait StimulusGenerator: Send {
    fn generate(&mut self, catalogue: &DimensionCatalogue, tic: Tic) -> Payload;
}

/// Produces the action recommendations a subsystem returns for one stimulus.
/// Every returned kind must be an action kind.
pub trait ActionGenerator: Send {
    fn actions(
        &mut self,
        catalogue: &DimensionCatalogue,
        stimulus: &Payload,
        tic: Tic,
    ) -> Vec<(ChunkKind, Payload)>;
}

/// Uniform sampler over the catalogue, optionally seeded.
pub struct RandomGenerator {
    rng: StdRng,
}

impl RandomGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl StimulusGenerator for RandomGenerator {
    fn generate(&mut self, catalogue: &DimensionCatalogue, _tic: Tic) -> Payload {
        catalogue.sample(&mut self.rng)
    }
}

impl ActionGenerator for RandomGenerator {
    fn actions(
        &mut self,
        catalogue: &DimensionCatalogue,
        _stimulus: &Payload,
        tic: Tic,
    ) -> Vec<(ChunkKind, Payload)> {
        let mut out = Vec::new();

        for _ in 0..2 {
            if self.rng.gen_bool(0.5) {
                out.push((ChunkKind::ActionGoalState, catalogue.sample(&mut self.rng)));
            }
        }
        for _ in 0..3 {
            if self.rng.gen_bool(0.5) {
                out.push((ChunkKind::ActionWorkingMemory, catalogue.sample(&mut self.rng)));
            }
        }
        let external = self.rng.gen_range(1..=3);
        for _ in 0..external {
            out.push((ChunkKind::ActionExternal, catalogue.sample(&mut self.rng)));
        }

        tracing::trace!(tic, actions = out.len(), "Generated action recommendations");
        out
    }
}

/// Generator that replays fixed payloads. Useful for deterministic runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    pub stimulus: Payload,
    pub actions: Vec<(ChunkKind, Payload)>,
}

impl StimulusGenerator for ScriptedGenerator {
    fn generate(&mut self, _catalogue: &DimensionCatalogue, _tic: Tic) -> Payload {
        self.stimulus.clone()
    }
}

impl ActionGenerator for ScriptedGenerator {
    fn actions(
        &mut self,
        _catalogue: &DimensionCatalogue,
        _stimulus: &Payload,
        _tic: Tic,
    ) -> Vec<(ChunkKind, Payload)> {
        self.actions.clone()
    }
}
