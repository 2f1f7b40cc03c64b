//! The plain map equation (spec.md §4.3).
//!
//! Grounded on `original_source/src/core/MapEquation.h`'s field layout
//! (`nodeFlow_log_nodeFlow`, `flow_log_flow`, `enter_log_enter`, `enterFlow`) and
//! `src/utils/infomath.h`'s `plogp`. Given module exit flow `qᵢ` and internal flow
//! `pᵢ`:
//! ```text
//! indexCodelength  = plogp(Σq) - Σ plogp(qᵢ)
//! moduleCodelength = Σ plogp(pᵢ+qᵢ) - Σ plogp(qᵢ) - Σ plogp(pα)        (leaves α)
//! codelength       = indexCodelength + moduleCodelength
//!                  = plogp(Σq) - 2·Σ plogp(qᵢ) + Σ plogp(pᵢ+qᵢ) - Σ plogp(pα)
//! ```
//! which is spec.md §4.3's `H(x)·x = -plogp(x)` formula rearranged.

use indexmap::IndexMap;

use super::{DeltaFlow, Objective, ObjectiveKind};
use crate::config::InfomapConfig;
use crate::math::plogp;
use crate::tree::iter::LeafIter;
use crate::tree::{FlowData, NodeId, Tree};

#[derive(Debug, Clone, Default)]
pub struct MapEq {
    pub codelength: f64,
    pub index_codelength: f64,
    pub module_codelength: f64,

    /// Constant while the leaf network is the same (`Σ plogp(leaf.flow)`).
    node_flow_log_node_flow: f64,
    /// `Σ plogp(pᵢ + qᵢ)` over modules.
    flow_log_flow: f64,
    /// `Σ plogp(qᵢ)` over modules.
    enter_log_enter: f64,
    /// `Σ qᵢ` over modules.
    enter_flow: f64,
}

impl MapEq {
    fn recalc_codelength(&mut self) {
        self.index_codelength = plogp(self.enter_flow) - self.enter_log_enter;
        self.module_codelength =
            self.flow_log_flow - self.enter_log_enter - self.node_flow_log_node_flow;
        self.codelength = self.index_codelength + self.module_codelength;
    }
}

impl Objective for MapEq {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::MapEq
    }

    fn init(&mut self, _config: &InfomapConfig) {}

    fn init_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.node_flow_log_node_flow =
            leaves.iter().map(|&n| plogp(tree.data(n).flow.flow)).sum();
    }

    fn init_partition(&mut self, tree: &Tree, nodes: &[NodeId]) -> (Vec<FlowData>, Vec<u32>) {
        let module_flow_data: Vec<FlowData> = nodes.iter().map(|&n| tree.data(n).flow).collect();
        let module_members = vec![1u32; nodes.len()];

        self.flow_log_flow =
            module_flow_data.iter().map(|m| plogp(m.flow + m.exit_flow)).sum();
        self.enter_log_enter = module_flow_data.iter().map(|m| plogp(m.exit_flow)).sum();
        self.enter_flow = module_flow_data.iter().map(|m| m.exit_flow).sum();
        self.recalc_codelength();

        (module_flow_data, module_members)
    }

    fn calc_codelength(&self, tree: &Tree, parent: NodeId) -> f64 {
        if tree.is_leaf(parent) {
            return 0.0;
        }
        let leaf_term: f64 =
            LeafIter::new(tree, parent).map(|n| plogp(tree.data(n).flow.flow)).sum();
        let mut flow_log_flow = 0.0;
        let mut enter_log_enter = 0.0;
        let mut enter_flow = 0.0;
        for module in tree.children(parent) {
            let data = tree.data(module).flow;
            flow_log_flow += plogp(data.flow + data.exit_flow);
            enter_log_enter += plogp(data.exit_flow);
            enter_flow += data.exit_flow;
        }
        let index_codelength = plogp(enter_flow) - enter_log_enter;
        let module_codelength = flow_log_flow - enter_log_enter - leaf_term;
        index_codelength + module_codelength
    }

    fn delta_codelength_on_move(
        &self,
        tree: &Tree,
        node: NodeId,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_flow_data: &[FlowData],
        _module_members: &[u32],
    ) -> f64 {
        if old_delta.module == new_delta.module {
            return 0.0;
        }
        let node_flow = tree.data(node).flow.flow;
        let total_out = tree.data(node).flow.exit_flow;

        let old = old_delta.module as usize;
        let new = new_delta.module as usize;
        let q_old_before = module_flow_data[old].exit_flow;
        let p_old_before = module_flow_data[old].flow;
        let q_new_before = module_flow_data[new].exit_flow;
        let p_new_before = module_flow_data[new].flow;

        let delta_q_old = old_delta.delta_enter + old_delta.delta_exit - total_out;
        let delta_q_new = total_out - new_delta.delta_exit - new_delta.delta_enter;

        let q_old_after = q_old_before + delta_q_old;
        let q_new_after = q_new_before + delta_q_new;
        let p_old_after = p_old_before - node_flow;
        let p_new_after = p_new_before + node_flow;

        let delta_enter_flow = delta_q_old + delta_q_new;
        let delta_enter_log_enter = (plogp(q_old_after) - plogp(q_old_before))
            + (plogp(q_new_after) - plogp(q_new_before));
        let delta_flow_log_flow = (plogp(p_old_after + q_old_after)
            - plogp(p_old_before + q_old_before))
            + (plogp(p_new_after + q_new_after) - plogp(p_new_before + q_new_before));

        (plogp(self.enter_flow + delta_enter_flow) - plogp(self.enter_flow))
            - 2.0 * delta_enter_log_enter
            + delta_flow_log_flow
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
        let node_flow = tree.data(node).flow.flow;
        let total_out = tree.data(node).flow.exit_flow;

        let old = old_delta.module as usize;
        let new = new_delta.module as usize;
        let q_old_before = module_flow_data[old].exit_flow;
        let p_old_before = module_flow_data[old].flow;
        let q_new_before = module_flow_data[new].exit_flow;
        let p_new_before = module_flow_data[new].flow;

        let delta_q_old = old_delta.delta_enter + old_delta.delta_exit - total_out;
        let delta_q_new = total_out - new_delta.delta_exit - new_delta.delta_enter;

        let q_old_after = q_old_before + delta_q_old;
        let q_new_after = q_new_before + delta_q_new;
        let p_old_after = p_old_before - node_flow;
        let p_new_after = p_new_before + node_flow;

        let delta_enter_flow = delta_q_old + delta_q_new;
        let delta_enter_log_enter = (plogp(q_old_after) - plogp(q_old_before))
            + (plogp(q_new_after) - plogp(q_new_before));
        let delta_flow_log_flow = (plogp(p_old_after + q_old_after)
            - plogp(p_old_before + q_old_before))
            + (plogp(p_new_after + q_new_after) - plogp(p_new_before + q_new_before));

        module_flow_data[old].exit_flow = q_old_after;
        module_flow_data[old].enter_flow = q_old_after;
        module_flow_data[old].flow = p_old_after;
        module_flow_data[new].exit_flow = q_new_after;
        module_flow_data[new].enter_flow = q_new_after;
        module_flow_data[new].flow = p_new_after;
        module_members[old] -= 1;
        module_members[new] += 1;

        self.enter_flow += delta_enter_flow;
        self.enter_log_enter += delta_enter_log_enter;
        self.flow_log_flow += delta_flow_log_flow;
        self.recalc_codelength();

        tree.data_mut(node).temp_index = new_delta.module;
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
        self.node_flow_log_node_flow =
            modules.iter().map(|&m| plogp(tree.data(m).flow.flow)).sum();
        self.flow_log_flow = 0.0;
        self.enter_log_enter = 0.0;
        self.enter_flow = 0.0;
        self.recalc_codelength();
    }

    fn codelength(&self) -> f64 {
        self.codelength
    }

    fn index_codelength(&self) -> f64 {
        self.index_codelength
    }

    fn module_codelength(&self) -> f64 {
        self.module_codelength
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowCalculator;
    use crate::network::test_utils::undirected;
    use crate::tree::NodeData;

    #[test]
    fn single_module_codelength_is_entropy_of_node_flows() {
        // A single all-encompassing module with zero exit flow: codelength
        // collapses to the node-flow entropy term.
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData {
            flow: FlowData { flow: 1.0, exit_flow: 0.0, ..Default::default() },
            ..Default::default()
        });
        tree.add_child(root, module);
        let mut leaves = Vec::new();
        for &f in &[0.25, 0.25, 0.5] {
            let leaf = tree.new_leaf(f, 0, 0, 0);
            tree.add_child(module, leaf);
            leaves.push(leaf);
        }
        tree.set_root(root);

        let mut objective = MapEq::default();
        objective.init_network(&tree, &leaves);
        let codelength = objective.calc_codelength(&tree, root);
        // L = plogp(0) - 2*plogp(0) + plogp(1.0+0.0) - (2*plogp(.25)+plogp(.5))
        let expected = -(plogp(0.25) * 2.0 + plogp(0.5));
        assert!((codelength - expected).abs() < 1e-9, "{codelength} vs {expected}");
    }

    #[test]
    fn ring_partition_has_lower_codelength_as_one_module() {
        let network = undirected(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)]);
        let config = InfomapConfig::default();
        let flow = FlowCalculator::calculate(&network, &config);

        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData::default());
        tree.add_child(root, module);
        let mut leaves = Vec::new();
        for i in 0..4u32 {
            let leaf = tree.new_leaf(flow.node_flow[i as usize], i, i, 0);
            tree.data_mut(leaf).flow.enter_flow = flow.node_enter_flow[i as usize];
            tree.data_mut(leaf).flow.exit_flow = flow.node_exit_flow[i as usize];
            tree.add_child(module, leaf);
            leaves.push(leaf);
        }
        tree.set_root(root);

        let mut objective = MapEq::default();
        objective.init_network(&tree, &leaves);
        let module_flow: f64 = leaves.iter().map(|&l| tree.data(l).flow.flow).sum();
        tree.data_mut(module).flow.flow = module_flow;
        tree.data_mut(module).flow.exit_flow = 0.0; // ring is one connected piece: no external exit once merged

        let codelength = objective.calc_codelength(&tree, root);
        assert!(codelength >= 0.0);
    }
}
