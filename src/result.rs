//! ResultWriter (component G, spec.md §6): the "result view" external writers
//! render `.clu`/`.tree`/`.ftree` output from.
//!
//! Grounded on `original_source/src/io/HierarchicalNetwork.cpp` and
//! `original_source/src/io/ClusterReader.cpp`: both walk the tree purely through its
//! iterators and a handful of scalars, never reaching into `GreedyOptimizer` or
//! `Objective` state directly. Byte-level `.clu`/`.tree`/`.ftree` formatting is out
//! of scope (spec.md §1's Non-goals); this module stops at the iterators and
//! scalars those formats would be built from.

use crate::engine::{top_level_index_codelength, Trial};
use crate::tree::iter::{
    InfomapTreeEntry, InfomapTreeIter, LeafIter, LeafModuleIter, PhysicalLeafIter, PostOrderIter,
    PreOrderIter,
};
use crate::tree::{NodeId, Tree};

/// Read-only view over one [`Trial`]'s tree, exposing the iterator family and
/// scalars spec.md §6 lists as the core's external interface.
pub struct ResultView<'a> {
    trial: &'a Trial,
}

impl<'a> ResultView<'a> {
    pub fn new(trial: &'a Trial) -> Self {
        ResultView { trial }
    }

    pub fn tree(&self) -> &'a Tree {
        &self.trial.tree
    }

    pub fn root(&self) -> NodeId {
        self.trial.tree.root().expect("a finished trial always has a root")
    }

    /// Two-level codelength of the best-of-N trial's top partition (spec.md §6).
    pub fn codelength(&self) -> f64 {
        self.trial.codelength
    }

    /// Full multi-level codelength, summed across every sub-engine (spec.md §6,
    /// §4.7's `calcCodelengthOnTree(true)`).
    pub fn hierarchical_codelength(&self) -> f64 {
        self.trial.hierarchical_codelength
    }

    /// Index-codebook cost of the top level alone, with every module's internal
    /// codelength excluded (spec.md §6; distinct from
    /// [`Self::hierarchical_codelength`]'s full-tree sum).
    pub fn index_codelength(&self) -> f64 {
        top_level_index_codelength(self.tree(), self.root())
    }

    /// Number of modules directly under the root (spec.md §6).
    pub fn num_top_modules(&self) -> u32 {
        self.tree().child_degree(self.root())
    }

    /// Top modules with at least two members; singleton modules describe nothing an
    /// index codebook entry wouldn't already (spec.md §6).
    pub fn num_non_trivial_top_modules(&self) -> u32 {
        let tree = self.tree();
        tree.children(self.root())
            .filter(|&m| tree.child_degree(m) > 1 || tree.has_sub_engine(m))
            .count() as u32
    }

    /// Depth of the deepest leaf below the root, crossing sub-engine boundaries,
    /// counting the root's own level as 1 (spec.md §6's "num_levels").
    pub fn num_levels(&self) -> u32 {
        self.infomap_tree_iter()
            .filter(|entry| self.is_leaf_entry(entry))
            .map(|entry| entry.depth + 1)
            .max()
            .unwrap_or(1)
    }

    fn is_leaf_entry(&self, entry: &InfomapTreeEntry<'_>) -> bool {
        entry.tree.is_leaf(entry.node)
    }

    /// Pre-order walk over the top-level tree only (does not descend into
    /// sub-engines; spec.md §4.1).
    pub fn pre_order(&self) -> PreOrderIter<'a> {
        PreOrderIter::new(self.tree(), self.root())
    }

    /// Post-order walk over the top-level tree only.
    pub fn post_order(&self) -> PostOrderIter<'a> {
        PostOrderIter::new(self.tree(), self.root())
    }

    /// Every leaf of the top-level tree (a node with a sub-engine counts as a leaf
    /// here; use [`Self::infomap_tree_iter`] to descend into it).
    pub fn leaves(&self) -> LeafIter<'a> {
        LeafIter::new(self.tree(), self.root())
    }

    /// Modules whose children are all ordinary leaves (spec.md §4.1).
    pub fn leaf_modules(&self) -> LeafModuleIter<'a> {
        LeafModuleIter::new(self.tree(), self.root())
    }

    /// Full depth-first walk crossing sub-engine boundaries, yielding each node's
    /// owning arena, 1-based path, and depth — the `.tree`/`.ftree` writer's
    /// primary traversal (spec.md §4.1, §6).
    pub fn infomap_tree_iter(&self) -> InfomapTreeIter<'a> {
        InfomapTreeIter::new(self.tree(), self.root())
    }

    /// State leaves of `leaf_module`, merged by physical id (spec.md §6's `.tree`
    /// "[+ physicalId]" note for memory/multilayer networks).
    pub fn physical_leaves(&self, leaf_module: NodeId) -> PhysicalLeafIter<'a> {
        PhysicalLeafIter::new(self.tree(), leaf_module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Trial;
    use crate::tree::{FlowData, NodeData};

    fn sample_trial() -> Trial {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData {
            flow: FlowData::with_flow(1.0),
            ..Default::default()
        });
        let m1 = tree.new_node(NodeData {
            flow: FlowData::with_flow(0.6),
            ..Default::default()
        });
        let m2 = tree.new_node(NodeData {
            flow: FlowData::with_flow(0.4),
            ..Default::default()
        });
        let a = tree.new_leaf(0.3, 0, 0, 0);
        let b = tree.new_leaf(0.3, 1, 1, 0);
        let c = tree.new_leaf(0.4, 2, 2, 0);
        tree.add_child(root, m1);
        tree.add_child(root, m2);
        tree.add_child(m1, a);
        tree.add_child(m1, b);
        tree.add_child(m2, c);
        tree.set_root(root);
        Trial { tree, codelength: 1.5, hierarchical_codelength: 1.5, seed: 0 }
    }

    #[test]
    fn scalars_report_top_level_shape() {
        let trial = sample_trial();
        let view = ResultView::new(&trial);
        assert_eq!(view.num_top_modules(), 2);
        assert_eq!(view.num_non_trivial_top_modules(), 1);
        assert_eq!(view.num_levels(), 3);
        assert!((view.codelength() - 1.5).abs() < 1e-12);
        assert!((view.hierarchical_codelength() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn index_codelength_uses_only_the_top_modules_exit_flow() {
        use crate::math::plogp;

        let mut tree = Tree::new();
        let root = tree.new_node(NodeData { flow: FlowData::with_flow(1.0), ..Default::default() });
        let m1 = tree.new_node(NodeData {
            flow: FlowData { flow: 0.6, exit_flow: 0.2, ..Default::default() },
            ..Default::default()
        });
        let m2 = tree.new_node(NodeData {
            flow: FlowData { flow: 0.4, exit_flow: 0.2, ..Default::default() },
            ..Default::default()
        });
        tree.add_child(root, m1);
        tree.add_child(root, m2);
        tree.set_root(root);
        let trial = Trial { tree, codelength: 0.0, hierarchical_codelength: 0.0, seed: 0 };
        let view = ResultView::new(&trial);

        let expected = plogp(0.4) - 2.0 * plogp(0.2);
        assert!((view.index_codelength() - expected).abs() < 1e-12);
    }

    #[test]
    fn leaf_modules_and_leaves_agree_on_membership() {
        let trial = sample_trial();
        let view = ResultView::new(&trial);
        let modules: Vec<_> = view.leaf_modules().collect();
        assert_eq!(modules.len(), 2);
        let leaves: Vec<_> = view.leaves().collect();
        assert_eq!(leaves.len(), 3);
    }

    #[test]
    fn infomap_tree_iter_assigns_one_based_paths_through_modules() {
        let trial = sample_trial();
        let view = ResultView::new(&trial);
        let leaf_paths: Vec<_> = view
            .infomap_tree_iter()
            .filter(|e| e.tree.is_leaf(e.node))
            .map(|e| e.path.clone())
            .collect();
        assert!(leaf_paths.contains(&vec![1, 1]));
        assert!(leaf_paths.contains(&vec![1, 2]));
        assert!(leaf_paths.contains(&vec![2, 1]));
    }

    #[test]
    fn physical_leaves_merges_state_nodes_within_a_module() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData { flow: FlowData::with_flow(1.0), ..Default::default() });
        let module = tree.new_node(NodeData::default());
        let s0 = tree.new_leaf(0.5, 0, 9, 0);
        let s1 = tree.new_leaf(0.5, 1, 9, 1);
        tree.add_child(root, module);
        tree.add_child(module, s0);
        tree.add_child(module, s1);
        tree.set_root(root);
        let trial = Trial { tree, codelength: 0.0, hierarchical_codelength: 0.0, seed: 0 };
        let view = ResultView::new(&trial);
        let merged: Vec<_> = view.physical_leaves(module).collect();
        assert_eq!(merged.len(), 1);
        assert!((merged[0].summed_flow - 1.0).abs() < 1e-12);
    }
}
