//! Engine configuration (spec.md §6).
//!
//! `InfomapConfig` is plain data: constructed programmatically by an embedding
//! application, never parsed from a CLI by this crate (that belongs to an external
//! collaborator, spec.md §1). It derives `serde` so an embedder can snapshot or log
//! it, the way the teacher derives `serde` on its own plain-data types.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The flow computation regime (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowModel {
    Undirected,
    Directed,
    Undirdir,
    Outdirdir,
    Rawdir,
}

impl Default for FlowModel {
    fn default() -> Self {
        FlowModel::Undirected
    }
}

impl FlowModel {
    pub fn is_directed(self) -> bool {
        !matches!(self, FlowModel::Undirected)
    }

    /// Whether this model runs the PageRank power iteration at all (spec.md §4.2).
    pub fn uses_page_rank(self) -> bool {
        matches!(self, FlowModel::Directed | FlowModel::Undirdir | FlowModel::Outdirdir)
    }
}

/// `fast_hierarchical_solution` progressively trims work out of the hierarchical
/// recursion (spec.md §6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FastHierarchicalSolution {
    /// Full fine-tune + coarse-tune + recursion.
    Off,
    /// Skip coarse-tune.
    SkipCoarseTune,
    /// Skip coarse-tune and skip sub-module recursion.
    SkipCoarseTuneAndSubModules,
    /// Two-level partition only (fine-tune still runs once).
    TopModulesOnly,
}

impl Default for FastHierarchicalSolution {
    fn default() -> Self {
        FastHierarchicalSolution::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfomapConfig {
    /// Skip hierarchical recursion; emit two-level partition only.
    pub two_level: bool,
    /// Independent re-runs; best kept.
    pub num_trials: u32,
    /// RNG seed base; trial `i` seeds with `seed + i`.
    pub seed: u64,
    pub flow_model: FlowModel,
    /// PageRank teleportation probability τ.
    pub teleportation_probability: f64,
    /// Teleport to nodes rather than links.
    pub teleport_to_nodes: bool,
    /// Multiplier applied to edge flow before optimization.
    pub markov_time: f64,
    /// Cap on inner convergence passes per level. 0 means unlimited.
    pub core_loop_limit: u32,
    /// Cap on fine/coarse tune outer iterations. 0 means unlimited.
    pub tune_iteration_limit: u32,
    /// Codelength epsilon accepting a single move.
    pub min_improvement: f64,
    /// Relative epsilon for tune-iteration acceptance.
    pub tune_iteration_relative_threshold: f64,
    pub fast_hierarchical_solution: FastHierarchicalSolution,
    /// Keep a modular partition even if one-module is strictly better.
    pub prefer_modular_solution: bool,
    /// Probability of relaxing to any layer (multilayer memory term).
    pub multilayer_relax_rate: f64,
    /// Layer-neighbourhood cap accepted for forward compatibility with the
    /// original's relax-limit options; not enforced by
    /// `RegularizedMultilayerMapEq` (SPEC_FULL.md Non-goals: relaxation always
    /// considers every layer sharing a module, unconstrained by distance).
    pub multilayer_relax_limit: Option<u32>,
    /// See `multilayer_relax_limit`; not enforced.
    pub multilayer_relax_limit_up: Option<u32>,
    /// See `multilayer_relax_limit`; not enforced.
    pub multilayer_relax_limit_down: Option<u32>,
    /// Preferred number of modules (biased objective).
    pub preferred_number_of_modules: Option<u32>,
    /// Bias strength γ (biased objective).
    pub gamma: f64,
    /// Encoding rate of metadata (meta objective). 1.0 means every step.
    pub meta_data_rate: f64,
    pub meta_data_unweighted: bool,
    /// Drop edges whose endpoints are equal before computing flow.
    pub include_self_links: bool,
    /// Drop edges with raw weight below this threshold.
    pub weight_threshold: f64,
    /// Enable §5 inner (within-trial) parallelism.
    pub inner_parallelization: bool,
    /// Cap on hierarchical super-module recursion depth. 0 means unlimited.
    pub level_limit: u32,
    /// Smallest accepted single-node codelength improvement (ε in spec.md §4.4).
    pub min_single_node_improvement: f64,
}

impl Default for InfomapConfig {
    fn default() -> Self {
        InfomapConfig {
            two_level: false,
            num_trials: 1,
            seed: 123,
            flow_model: FlowModel::Undirected,
            teleportation_probability: 0.15,
            teleport_to_nodes: false,
            markov_time: 1.0,
            core_loop_limit: 0,
            tune_iteration_limit: 0,
            min_improvement: 1e-10,
            tune_iteration_relative_threshold: 1e-5,
            fast_hierarchical_solution: FastHierarchicalSolution::Off,
            prefer_modular_solution: false,
            multilayer_relax_rate: 0.0,
            multilayer_relax_limit: None,
            multilayer_relax_limit_up: None,
            multilayer_relax_limit_down: None,
            preferred_number_of_modules: None,
            gamma: 0.0,
            meta_data_rate: 1.0,
            meta_data_unweighted: false,
            include_self_links: false,
            weight_threshold: 0.0,
            inner_parallelization: false,
            level_limit: 0,
            min_single_node_improvement: 1e-15,
        }
    }
}

impl InfomapConfig {
    /// Reject option combinations that cannot be jointly satisfied (spec.md §7,
    /// *Configuration* error kind).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_trials == 0 {
            return Err(ConfigError::ConflictingOptions(
                "num_trials must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.teleportation_probability) {
            return Err(ConfigError::ConflictingOptions(
                "teleportation_probability must be in [0, 1)".into(),
            ));
        }
        if self.gamma != 0.0 && self.preferred_number_of_modules.is_none() {
            return Err(ConfigError::ConflictingOptions(
                "gamma set without preferred_number_of_modules".into(),
            ));
        }
        if self.multilayer_relax_rate < 0.0 || self.multilayer_relax_rate > 1.0 {
            return Err(ConfigError::ConflictingOptions(
                "multilayer_relax_rate must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Whether coarse-tune passes should run at all (spec.md §4.6), folding in
    /// `fast_hierarchical_solution`'s progressive trimming (spec.md §6 table).
    pub fn run_coarse_tune(&self) -> bool {
        matches!(self.fast_hierarchical_solution, FastHierarchicalSolution::Off)
    }

    /// Whether sub-module recursion (spec.md §4.7 step 3) should run at all.
    pub fn run_sub_module_recursion(&self) -> bool {
        !self.two_level
            && !matches!(
                self.fast_hierarchical_solution,
                FastHierarchicalSolution::SkipCoarseTuneAndSubModules
                    | FastHierarchicalSolution::TopModulesOnly
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = InfomapConfig::default();
        assert_eq!(config.teleportation_probability, 0.15);
        assert_eq!(config.num_trials, 1);
        assert!(!config.two_level);
        config.validate().unwrap();
    }

    #[test]
    fn gamma_without_preferred_modules_rejected() {
        let mut config = InfomapConfig::default();
        config.gamma = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_trials_rejected() {
        let mut config = InfomapConfig::default();
        config.num_trials = 0;
        assert!(config.validate().is_err());
    }
}
