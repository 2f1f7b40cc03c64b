//! Objective (component C, spec.md §4.3): the map-equation variant interface.
//!
//! `Objective` is a Rust trait, not a C++ virtual base (SPEC_FULL.md "Trait shape").
//! The five concrete variants each implement it directly; an [`ObjectiveKind`]
//! selected from [`crate::config::InfomapConfig`] performs the one-time variant
//! choice at engine construction and boxes the chosen objective behind
//! `Box<dyn Objective>` only at that seam — [`crate::optimizer::GreedyOptimizer`]'s
//! inner loop is written once against the trait and is not duplicated per variant.

pub mod biased_map_eq;
pub mod map_eq;
pub mod mem_map_eq;
pub mod meta_map_eq;
pub mod multilayer_map_eq;

pub use biased_map_eq::BiasedMapEq;
pub use map_eq::MapEq;
pub use mem_map_eq::MemMapEq;
pub use meta_map_eq::MetaMapEq;
pub use multilayer_map_eq::RegularizedMultilayerMapEq;

use indexmap::IndexMap;

use crate::config::InfomapConfig;
use crate::tree::{FlowData, NodeId, Tree};

/// The "small per-target-module map" entry of spec.md §4.4 step 2a. Aggregates one
/// node's edge flow to/from a candidate module. Mirrors
/// `original_source/src/core/FlowData.h`'s `DeltaFlow`/`MemDeltaFlow`, flattened
/// into one concrete, object-safe type carrying every variant's extra fields (zero
/// when a variant doesn't use them) rather than a per-variant associated type, so it
/// can cross the `dyn Objective` boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaFlow {
    pub module: u32,
    pub delta_exit: f64,
    pub delta_enter: f64,
    pub count: u32,
    /// Memory objective cross-term (spec.md §4.3, `add_memory_contributions`).
    pub sum_delta_plogp_phys_flow: f64,
    pub sum_plogp_phys_flow: f64,
}

impl DeltaFlow {
    pub fn new(module: u32) -> Self {
        DeltaFlow { module, ..Default::default() }
    }

    pub fn reset(&mut self) {
        *self = DeltaFlow::default();
    }
}

impl std::ops::AddAssign for DeltaFlow {
    fn add_assign(&mut self, other: Self) {
        self.module = other.module;
        self.delta_exit += other.delta_exit;
        self.delta_enter += other.delta_enter;
        self.count += 1;
        self.sum_delta_plogp_phys_flow += other.sum_delta_plogp_phys_flow;
        self.sum_plogp_phys_flow += other.sum_plogp_phys_flow;
    }
}

/// Selects which [`Objective`] implementation an engine constructs (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectiveKind {
    MapEq,
    MemMapEq,
    MetaMapEq,
    BiasedMapEq,
    RegularizedMultilayerMapEq,
}

impl ObjectiveKind {
    pub fn build(self) -> Box<dyn Objective> {
        match self {
            ObjectiveKind::MapEq => Box::new(MapEq::default()),
            ObjectiveKind::MemMapEq => Box::new(MemMapEq::default()),
            ObjectiveKind::MetaMapEq => Box::new(MetaMapEq::default()),
            ObjectiveKind::BiasedMapEq => Box::new(BiasedMapEq::default()),
            ObjectiveKind::RegularizedMultilayerMapEq => {
                Box::new(RegularizedMultilayerMapEq::default())
            }
        }
    }
}

/// Closed interface for map-equation variants (spec.md §4.3).
///
/// Every method takes the [`Tree`] explicitly rather than owning it: the tree is
/// shared with [`crate::optimizer::GreedyOptimizer`] and [`crate::engine::InfomapEngine`],
/// per spec.md §5's ownership model (the arena is exclusively owned by its engine).
pub trait Objective: std::fmt::Debug {
    fn kind(&self) -> ObjectiveKind;

    /// Fix constants from config (markov_time is applied upstream in
    /// [`crate::flow::FlowCalculator`]; this reads variant-specific knobs like
    /// `gamma`/`meta_data_rate`/`multilayer_relax_rate`).
    fn init(&mut self, config: &InfomapConfig);

    /// Pre-compute terms constant over the level (spec.md §4.3): the leaf-flow
    /// entropy constant `nodeFlow_log_nodeFlow` and any variant-specific per-leaf
    /// bookkeeping (physical-node registry, meta collections, layer teleport maps).
    fn init_network(&mut self, tree: &Tree, leaves: &[NodeId]);

    /// Same pre-computation when this objective runs on a super-network (module
    /// nodes standing in as leaves, spec.md §4.7 step 2).
    fn init_super_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.init_network(tree, leaves);
    }

    /// Same pre-computation when this objective runs on a sub-network (one
    /// module's internal leaves, spec.md §4.7 step 3).
    fn init_sub_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.init_network(tree, leaves);
    }

    /// Initialize `moduleFlowData`/`moduleMembers` from a singleton assignment (one
    /// module per leaf) and set the codelength baseline (spec.md §4.5 step 1).
    fn init_partition(
        &mut self,
        tree: &Tree,
        nodes: &[NodeId],
    ) -> (Vec<FlowData>, Vec<u32>);

    /// Codelength over the leaves in `parent`'s subtree under the *tree's current*
    /// module assignment (`parent`'s immediate children are modules, spec.md §4.3).
    fn calc_codelength(&self, tree: &Tree, parent: NodeId) -> f64;

    /// Change in codelength if `node` moves from `old_delta.module` to
    /// `new_delta.module` (spec.md §4.3); does not mutate state.
    #[allow(clippy::too_many_arguments)]
    fn delta_codelength_on_move(
        &self,
        tree: &Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_flow_data: &[FlowData],
        module_members: &[u32],
    ) -> f64;

    /// Apply the move computed by `delta_codelength_on_move` to `moduleFlowData`
    /// and this objective's running codelength terms.
    #[allow(clippy::too_many_arguments)]
    fn update_on_move(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_flow_data: &mut [FlowData],
        module_members: &mut [u32],
    );

    /// Memory/multilayer variants enrich `deltas` with cross-term contributions
    /// (spec.md §4.3); no-op for the plain map equation and the biased/meta
    /// variants, which carry their corrections entirely in
    /// `delta_codelength_on_move` instead.
    fn add_memory_contributions(
        &self,
        tree: &Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        deltas: &mut IndexMap<u32, DeltaFlow>,
    ) {
        let _ = (tree, node, old_delta, deltas);
    }

    /// Biased objective only: whether a move creates (+1), annihilates (-1), or
    /// preserves (0) a module, used by `delta_num_modules_if_moving` (spec.md
    /// §4.3: "a move creates a module iff it empties `old` and fills a previously
    /// empty `new`").
    fn delta_num_modules_if_moving(&self, old_emptied: bool, new_was_empty: bool) -> i32 {
        let _ = (old_emptied, new_was_empty);
        0
    }

    /// Absorb the current assignment into the tree, clearing stale per-level state
    /// (spec.md §4.3).
    fn consolidate_modules(&mut self, tree: &mut Tree, modules: &[NodeId]);

    fn codelength(&self) -> f64;
    fn index_codelength(&self) -> f64;
    fn module_codelength(&self) -> f64;
}
