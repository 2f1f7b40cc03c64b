//! Biased map equation (spec.md §4.3): penalizes deviation from a preferred
//! number of top modules `m★` by `γ · ln(1 + |m − m★|)`.
//!
//! Grounded on `original_source/src/core/BiasedMapEquation.h`. A move only ever
//! changes `m` by at most one, via `delta_num_modules_if_moving`: it creates a
//! module iff it empties `old` and fills a previously empty `new`, annihilates one
//! iff the reverse, and otherwise leaves `m` unchanged (spec.md §4.3).

use indexmap::IndexMap;

use super::{DeltaFlow, MapEq, Objective, ObjectiveKind};
use crate::config::InfomapConfig;
use crate::tree::{FlowData, NodeId, Tree};

#[derive(Debug, Clone, Default)]
pub struct BiasedMapEq {
    base: MapEq,
    gamma: f64,
    preferred_num_modules: u32,
    num_modules: u32,
    bias: f64,
}

impl BiasedMapEq {
    fn bias_of(&self, num_modules: u32) -> f64 {
        let diff = (num_modules as i64 - self.preferred_num_modules as i64).unsigned_abs() as f64;
        self.gamma * (1.0 + diff).ln()
    }

    fn recalc(&mut self) {
        self.bias = self.bias_of(self.num_modules);
        self.base.module_codelength += self.bias;
        self.base.codelength = self.base.index_codelength + self.base.module_codelength;
    }
}

impl Objective for BiasedMapEq {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::BiasedMapEq
    }

    fn init(&mut self, config: &InfomapConfig) {
        self.base.init(config);
        self.gamma = config.gamma;
        self.preferred_num_modules = config.preferred_number_of_modules.unwrap_or(1);
    }

    fn init_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.base.init_network(tree, leaves);
    }

    fn init_partition(&mut self, tree: &Tree, nodes: &[NodeId]) -> (Vec<FlowData>, Vec<u32>) {
        let (module_flow_data, module_members) = self.base.init_partition(tree, nodes);
        self.num_modules = nodes.len() as u32;
        self.bias = 0.0;
        self.recalc();
        (module_flow_data, module_members)
    }

    fn calc_codelength(&self, tree: &Tree, parent: NodeId) -> f64 {
        let base = self.base.calc_codelength(tree, parent);
        base + self.bias_of(tree.child_degree(parent))
    }

    fn delta_codelength_on_move(
        &self,
        tree: &Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_flow_data: &[FlowData],
        module_members: &[u32],
    ) -> f64 {
        if old_delta.module == new_delta.module {
            return 0.0;
        }
        let base_delta = self.base.delta_codelength_on_move(
            tree,
            node,
            old_delta,
            new_delta,
            module_flow_data,
            module_members,
        );
        let old_emptied = module_members[old_delta.module as usize] == 1;
        let new_was_empty = module_members[new_delta.module as usize] == 0;
        let delta_modules = self.delta_num_modules_if_moving(old_emptied, new_was_empty);
        let new_num_modules = (self.num_modules as i64 + delta_modules as i64).max(0) as u32;
        base_delta + (self.bias_of(new_num_modules) - self.bias)
    }

    fn update_on_move(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_flow_data: &mut [FlowData],
        module_members: &mut [u32],
    ) {
        if old_delta.module == new_delta.module {
            return;
        }
        let old_emptied = module_members[old_delta.module as usize] == 1;
        let new_was_empty = module_members[new_delta.module as usize] == 0;
        let delta_modules = self.delta_num_modules_if_moving(old_emptied, new_was_empty);
        self.num_modules = (self.num_modules as i64 + delta_modules as i64).max(0) as u32;

        self.base.update_on_move(
            tree,
            node,
            old_delta,
            new_delta,
            module_flow_data,
            module_members,
        );
        self.recalc();
    }

    fn add_memory_contributions(
        &self,
        _tree: &Tree,
        _node: NodeId,
        _old_delta: &DeltaFlow,
        _deltas: &mut IndexMap<u32, DeltaFlow>,
    ) {
    }

    fn delta_num_modules_if_moving(&self, old_emptied: bool, new_was_empty: bool) -> i32 {
        match (old_emptied, new_was_empty) {
            (true, true) => 0,
            (true, false) => -1,
            (false, true) => 1,
            (false, false) => 0,
        }
    }

    fn consolidate_modules(&mut self, tree: &mut Tree, modules: &[NodeId]) {
        self.base.consolidate_modules(tree, modules);
        self.num_modules = modules.len() as u32;
        self.bias = 0.0;
        self.recalc();
    }

    fn codelength(&self) -> f64 {
        self.base.codelength
    }

    fn index_codelength(&self) -> f64 {
        self.base.index_codelength
    }

    fn module_codelength(&self) -> f64 {
        self.base.module_codelength
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeData;

    #[test]
    fn bias_grows_with_distance_from_preferred_module_count() {
        let config = InfomapConfig {
            gamma: 1.0,
            preferred_number_of_modules: Some(3),
            ..Default::default()
        };
        let mut objective = BiasedMapEq::default();
        objective.init(&config);

        let close = objective.bias_of(4);
        let far = objective.bias_of(10);
        assert!(far > close);
        assert!((objective.bias_of(3)).abs() < 1e-12);
    }

    #[test]
    fn delta_num_modules_matches_spec_rule() {
        let objective = BiasedMapEq::default();
        assert_eq!(objective.delta_num_modules_if_moving(true, true), 0);
        assert_eq!(objective.delta_num_modules_if_moving(true, false), -1);
        assert_eq!(objective.delta_num_modules_if_moving(false, true), 1);
        assert_eq!(objective.delta_num_modules_if_moving(false, false), 0);
    }

    #[test]
    fn init_partition_seeds_one_module_per_leaf() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let a = tree.new_leaf(0.5, 0, 0, 0);
        let b = tree.new_leaf(0.5, 1, 1, 0);
        tree.add_child(root, a);
        tree.add_child(root, b);
        tree.set_root(root);

        let config = InfomapConfig { gamma: 0.5, preferred_number_of_modules: Some(1), ..Default::default() };
        let mut objective = BiasedMapEq::default();
        objective.init(&config);
        objective.init_network(&tree, &[a, b]);
        objective.init_partition(&tree, &[a, b]);
        assert_eq!(objective.num_modules, 2);
    }
}
