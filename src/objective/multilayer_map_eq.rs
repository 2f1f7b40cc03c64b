//! Regularized multilayer map equation (spec.md §4.3, §3.4).
//!
//! Grounded on `original_source/src/core/RegularizedMultilayerMapEquation.h`: each module
//! keeps a [`MultiFlowData`] — a per-layer teleport flow/weight aggregate merged
//! in from every member leaf's own `multi_flow` via
//! [`crate::tree::flow_data::merge_multi_flow`]/`unmerge_multi_flow`. A layer
//! touched by more than one leaf inside the same module lets the walker relax
//! across layers without paying the index codebook again, so — exactly the shape
//! of [`super::MemMapEq`]'s physical-redundancy correction — `multilayer_relax_rate
//! · (k−1)/k · H(teleportFlow)·teleportFlow` is removed per (module, layer) with
//! `k` touching leaves.

use hashbrown::HashMap;
use indexmap::IndexMap;

use super::{DeltaFlow, MapEq, Objective, ObjectiveKind};
use crate::config::InfomapConfig;
use crate::math::plogp;
use crate::tree::flow_data::{merge_multi_flow, unmerge_multi_flow};
use crate::tree::{FlowData, LayerTeleFlowData, MultiFlowData, NodeId, Tree};

fn correction_term(entry: LayerTeleFlowData, relax_rate: f64) -> f64 {
    if entry.num_nodes > 1 {
        let k = entry.num_nodes as f64;
        relax_rate * ((k - 1.0) / k) * (-plogp(entry.teleport_flow))
    } else {
        0.0
    }
}

fn single_leaf_multi_flow(tree: &Tree, node: NodeId) -> MultiFlowData {
    let data = tree.data(node);
    data.multi_flow.clone().unwrap_or_else(|| {
        let mut m = MultiFlowData::default();
        m.insert(
            data.layer_id,
            LayerTeleFlowData {
                num_nodes: 1,
                teleport_flow: data.flow.teleport_flow,
                teleport_weight: data.flow.teleport_weight,
            },
        );
        m
    })
}

#[derive(Debug, Clone, Default)]
pub struct RegularizedMultilayerMapEq {
    base: MapEq,
    relax_rate: f64,
    module_multi_flow: HashMap<u32, MultiFlowData>,
    multilayer_correction: f64,
}

impl RegularizedMultilayerMapEq {
    fn module_correction(&self, module: u32) -> f64 {
        self.module_multi_flow
            .get(&module)
            .map(|by_layer| by_layer.values().map(|&e| correction_term(e, self.relax_rate)).sum())
            .unwrap_or(0.0)
    }

    fn recalc_codelength(&mut self) {
        self.base.module_codelength -= self.multilayer_correction;
        self.base.codelength = self.base.index_codelength + self.base.module_codelength;
    }
}

impl Objective for RegularizedMultilayerMapEq {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::RegularizedMultilayerMapEq
    }

    fn init(&mut self, config: &InfomapConfig) {
        self.base.init(config);
        self.relax_rate = config.multilayer_relax_rate;
    }

    fn init_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.base.init_network(tree, leaves);
    }

    fn init_partition(&mut self, tree: &Tree, nodes: &[NodeId]) -> (Vec<FlowData>, Vec<u32>) {
        let (module_flow_data, module_members) = self.base.init_partition(tree, nodes);

        self.module_multi_flow.clear();
        for (module_index, &node) in nodes.iter().enumerate() {
            let leaf_multi_flow = single_leaf_multi_flow(tree, node);
            merge_multi_flow(
                self.module_multi_flow.entry(module_index as u32).or_default(),
                &leaf_multi_flow,
            );
        }
        self.multilayer_correction =
            (0..nodes.len() as u32).map(|m| self.module_correction(m)).sum();
        self.recalc_codelength();

        (module_flow_data, module_members)
    }

    fn calc_codelength(&self, tree: &Tree, parent: NodeId) -> f64 {
        let base = self.base.calc_codelength(tree, parent);
        let mut by_module: HashMap<u32, MultiFlowData> = HashMap::new();
        for (module_index, module) in tree.children(parent).enumerate() {
            let entry = by_module.entry(module_index as u32).or_default();
            for leaf in crate::tree::iter::LeafIter::new(tree, module) {
                merge_multi_flow(entry, &single_leaf_multi_flow(tree, leaf));
            }
        }
        let correction: f64 = by_module
            .values()
            .flat_map(|m| m.values())
            .map(|&e| correction_term(e, self.relax_rate))
            .sum();
        base - correction
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

        let leaf_multi_flow = single_leaf_multi_flow(tree, node);
        let old_before = self.module_correction(old_delta.module);
        let new_before = self.module_correction(new_delta.module);

        let mut old_map = self.module_multi_flow.get(&old_delta.module).cloned().unwrap_or_default();
        unmerge_multi_flow(&mut old_map, &leaf_multi_flow);
        let old_after: f64 =
            old_map.values().map(|&e| correction_term(e, self.relax_rate)).sum();

        let mut new_map = self.module_multi_flow.get(&new_delta.module).cloned().unwrap_or_default();
        merge_multi_flow(&mut new_map, &leaf_multi_flow);
        let new_after: f64 =
            new_map.values().map(|&e| correction_term(e, self.relax_rate)).sum();

        let delta_correction = (old_after - old_before) + (new_after - new_before);
        base_delta - delta_correction
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
        let leaf_multi_flow = single_leaf_multi_flow(tree, node);
        let old_before = self.module_correction(old_delta.module);
        let new_before = self.module_correction(new_delta.module);

        unmerge_multi_flow(
            self.module_multi_flow.entry(old_delta.module).or_default(),
            &leaf_multi_flow,
        );
        merge_multi_flow(
            self.module_multi_flow.entry(new_delta.module).or_default(),
            &leaf_multi_flow,
        );

        let old_after = self.module_correction(old_delta.module);
        let new_after = self.module_correction(new_delta.module);
        self.multilayer_correction += (old_after - old_before) + (new_after - new_before);

        self.base.update_on_move(
            tree,
            node,
            old_delta,
            new_delta,
            module_flow_data,
            module_members,
        );
        self.recalc_codelength();
    }

    fn add_memory_contributions(
        &self,
        _tree: &Tree,
        _node: NodeId,
        _old_delta: &DeltaFlow,
        _deltas: &mut IndexMap<u32, DeltaFlow>,
    ) {
    }

    fn consolidate_modules(&mut self, tree: &mut Tree, modules: &[NodeId]) {
        self.base.consolidate_modules(tree, modules);
        self.module_multi_flow.clear();
        self.multilayer_correction = 0.0;
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
    fn shared_layer_within_a_module_lowers_codelength() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData::default());
        tree.add_child(root, module);

        let mut multi_flow_a = MultiFlowData::default();
        multi_flow_a.insert(
            0,
            LayerTeleFlowData { num_nodes: 1, teleport_flow: 0.1, teleport_weight: 0.1 },
        );
        let mut multi_flow_b = MultiFlowData::default();
        multi_flow_b.insert(
            0,
            LayerTeleFlowData { num_nodes: 1, teleport_flow: 0.1, teleport_weight: 0.1 },
        );

        let a = tree.new_leaf(0.5, 0, 0, 0);
        tree.data_mut(a).multi_flow = Some(multi_flow_a);
        let b = tree.new_leaf(0.5, 1, 1, 0);
        tree.data_mut(b).multi_flow = Some(multi_flow_b);
        tree.add_child(module, a);
        tree.add_child(module, b);
        tree.set_root(root);

        let config = InfomapConfig { multilayer_relax_rate: 0.5, ..Default::default() };
        let mut objective = RegularizedMultilayerMapEq::default();
        objective.init(&config);
        objective.init_network(&tree, &[a, b]);
        let with_relax = objective.calc_codelength(&tree, root);

        let config_no_relax = InfomapConfig { multilayer_relax_rate: 0.0, ..Default::default() };
        let mut objective_no_relax = RegularizedMultilayerMapEq::default();
        objective_no_relax.init(&config_no_relax);
        objective_no_relax.init_network(&tree, &[a, b]);
        let without_relax = objective_no_relax.calc_codelength(&tree, root);

        assert!(with_relax <= without_relax + 1e-12);
    }
}
