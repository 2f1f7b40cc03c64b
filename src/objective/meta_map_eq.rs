//! Meta map equation (spec.md §4.3, §3.4): an extra entropy term over a
//! categorical meta-attribute per leaf, on top of the plain map equation.
//!
//! Grounded on `original_source/src/core/MetaMapEquation.h`'s `MetaCollection`
//! (per-module category histogram). `H(MetaCollection[m])` is expressed in the
//! same `plogp`-weighted-by-total form the rest of this crate uses for codelength
//! terms (spec.md §4.3), not a normalized Shannon entropy: `metaTerm(m) =
//! plogp(total_m) − Σ_c plogp(weight_c)`, so `metaDataRate · Σ_m metaTerm(m)` stays
//! in the same bit-weighted-by-flow units as `index_codelength`/`module_codelength`.

use hashbrown::HashMap;
use indexmap::IndexMap;

use super::{DeltaFlow, MapEq, Objective, ObjectiveKind};
use crate::config::InfomapConfig;
use crate::math::plogp;
use crate::tree::iter::LeafModuleIter;
use crate::tree::{FlowData, NodeId, Tree};

#[derive(Debug, Clone, Default)]
struct Category {
    total: f64,
    by_category: HashMap<i64, f64>,
}

impl Category {
    fn term(&self) -> f64 {
        plogp(self.total) - self.by_category.values().map(|&w| plogp(w)).sum::<f64>()
    }

    fn add(&mut self, category: i64, weight: f64) {
        self.total += weight;
        *self.by_category.entry(category).or_insert(0.0) += weight;
    }

    fn remove(&mut self, category: i64, weight: f64) {
        self.total -= weight;
        if let Some(w) = self.by_category.get_mut(&category) {
            *w -= weight;
            if *w <= 0.0 {
                self.by_category.remove(&category);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaMapEq {
    base: MapEq,
    meta_data_rate: f64,
    weight_by_flow: bool,
    by_module: HashMap<u32, Category>,
    meta_codelength: f64,
}

impl MetaMapEq {
    fn node_weight(&self, tree: &Tree, node: NodeId) -> f64 {
        if self.weight_by_flow {
            tree.data(node).flow.flow
        } else {
            1.0
        }
    }

    fn category_of(&self, tree: &Tree, node: NodeId) -> Option<i64> {
        tree.data(node).meta_category
    }

    fn recalc_meta_codelength(&mut self) {
        self.meta_codelength =
            self.meta_data_rate * self.by_module.values().map(Category::term).sum::<f64>();
        self.base.module_codelength += self.meta_codelength;
        self.base.codelength = self.base.index_codelength + self.base.module_codelength;
    }
}

impl Objective for MetaMapEq {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::MetaMapEq
    }

    fn init(&mut self, config: &InfomapConfig) {
        self.base.init(config);
        self.meta_data_rate = config.meta_data_rate;
        self.weight_by_flow = !config.meta_data_unweighted;
    }

    fn init_network(&mut self, tree: &Tree, leaves: &[NodeId]) {
        self.base.init_network(tree, leaves);
    }

    fn init_partition(&mut self, tree: &Tree, nodes: &[NodeId]) -> (Vec<FlowData>, Vec<u32>) {
        let (module_flow_data, module_members) = self.base.init_partition(tree, nodes);

        self.by_module.clear();
        for (module_index, &node) in nodes.iter().enumerate() {
            if let Some(category) = self.category_of(tree, node) {
                let weight = self.node_weight(tree, node);
                self.by_module.entry(module_index as u32).or_default().add(category, weight);
            }
        }
        // module_codelength was already set by base.init_partition's recalc; add
        // the meta term exactly once.
        self.meta_codelength = 0.0;
        self.recalc_meta_codelength();

        (module_flow_data, module_members)
    }

    fn calc_codelength(&self, tree: &Tree, parent: NodeId) -> f64 {
        let base = self.base.calc_codelength(tree, parent);
        let mut by_module: HashMap<u32, Category> = HashMap::new();
        for (module_index, leaf_module) in LeafModuleIter::new(tree, parent).enumerate() {
            for leaf in tree.children(leaf_module) {
                if let Some(category) = self.category_of(tree, leaf) {
                    let weight = self.node_weight(tree, leaf);
                    by_module.entry(module_index as u32).or_default().add(category, weight);
                }
            }
        }
        let meta: f64 = self.meta_data_rate * by_module.values().map(Category::term).sum::<f64>();
        base + meta
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
        let Some(category) = self.category_of(tree, node) else {
            return base_delta;
        };
        let weight = self.node_weight(tree, node);

        let old_before = self.by_module.get(&old_delta.module).cloned().unwrap_or_default();
        let mut old_after = old_before.clone();
        old_after.remove(category, weight);

        let new_before = self.by_module.get(&new_delta.module).cloned().unwrap_or_default();
        let mut new_after = new_before.clone();
        new_after.add(category, weight);

        let delta_meta = self.meta_data_rate
            * ((old_after.term() - old_before.term()) + (new_after.term() - new_before.term()));

        base_delta + delta_meta
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
        if let Some(category) = self.category_of(tree, node) {
            let weight = self.node_weight(tree, node);
            self.by_module.entry(old_delta.module).or_default().remove(category, weight);
            self.by_module.entry(new_delta.module).or_default().add(category, weight);
        }
        self.base.update_on_move(
            tree,
            node,
            old_delta,
            new_delta,
            module_flow_data,
            module_members,
        );
        self.meta_codelength = 0.0;
        self.recalc_meta_codelength();
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
        self.by_module.clear();
        self.meta_codelength = 0.0;
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
    fn mixed_categories_cost_more_than_a_single_category_per_module() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData::default());
        tree.add_child(root, module);
        let mut leaves = Vec::new();
        for (i, category) in [0i64, 0, 1].into_iter().enumerate() {
            let leaf_id = tree.new_leaf(1.0 / 3.0, i as u32, i as u32, 0);
            tree.data_mut(leaf_id).meta_category = Some(category);
            tree.add_child(module, leaf_id);
            leaves.push(leaf_id);
        }
        tree.set_root(root);

        let config = InfomapConfig { meta_data_rate: 1.0, meta_data_unweighted: true, ..Default::default() };
        let mut objective = MetaMapEq::default();
        objective.init(&config);
        objective.init_network(&tree, &leaves);
        let mixed = objective.calc_codelength(&tree, root);

        for leaf_id in &leaves {
            tree.data_mut(*leaf_id).meta_category = Some(0);
        }
        let uniform = objective.calc_codelength(&tree, root);
        assert!(mixed >= uniform - 1e-12);
    }
}
