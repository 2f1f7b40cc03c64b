//! Tree iterators (spec.md §4.1): sibling, depth-first, leaf, leaf-module,
//! infomap-tree (crosses sub-engine boundaries), physical-leaf.
//!
//! All traversals are explicit-stack, not recursive, per spec.md §9's redesign note
//! ("explicit stack rather than pointer walks" in place of the source's `owner`
//! backedge) and to keep stack depth bounded regardless of tree depth.

use hashbrown::HashMap;

use super::{NodeId, Tree};

/// Siblings of a node, in order, starting from a given first node.
pub struct SiblingIter<'a> {
    tree: &'a Tree,
    current: Option<NodeId>,
}

impl<'a> SiblingIter<'a> {
    pub fn new(tree: &'a Tree, first: Option<NodeId>) -> Self {
        SiblingIter { tree, current: first }
    }
}

impl<'a> Iterator for SiblingIter<'a> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        let current = self.current?;
        self.current = self.tree.next_sibling(current);
        Some(current)
    }
}

/// Pre-order depth-first walk over ordinary children only (does not descend into
/// sub-engines; use [`InfomapTreeIter`] for that).
pub struct PreOrderIter<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl<'a> PreOrderIter<'a> {
    pub fn new(tree: &'a Tree, root: NodeId) -> Self {
        PreOrderIter { tree, stack: vec![root] }
    }
}

impl<'a> Iterator for PreOrderIter<'a> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        // push children in reverse so the leftmost child pops first
        let children: Vec<_> = self.tree.children(node).collect();
        self.stack.extend(children.into_iter().rev());
        Some(node)
    }
}

/// Post-order depth-first walk over ordinary children only.
pub struct PostOrderIter<'a> {
    tree: &'a Tree,
    /// (node, children-remaining-to-visit) frames; classic two-stack post-order.
    stack: Vec<(NodeId, bool)>,
}

impl<'a> PostOrderIter<'a> {
    pub fn new(tree: &'a Tree, root: NodeId) -> Self {
        PostOrderIter { tree, stack: vec![(root, false)] }
    }
}

impl<'a> Iterator for PostOrderIter<'a> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        loop {
            let (node, expanded) = self.stack.pop()?;
            if expanded {
                return Some(node);
            }
            self.stack.push((node, true));
            let children: Vec<_> = self.tree.children(node).collect();
            for child in children.into_iter().rev() {
                self.stack.push((child, false));
            }
        }
    }
}

/// All leaves under `root`, left to right. A node with a sub-engine counts as a
/// leaf of *this* tree (its substitute subtree lives in a different arena).
pub struct LeafIter<'a> {
    inner: PreOrderIter<'a>,
}

impl<'a> LeafIter<'a> {
    pub fn new(tree: &'a Tree, root: NodeId) -> Self {
        LeafIter { inner: PreOrderIter::new(tree, root) }
    }
}

impl<'a> Iterator for LeafIter<'a> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        for node in self.inner.by_ref() {
            if self.inner.tree.is_leaf(node) {
                return Some(node);
            }
        }
        None
    }
}

/// Modules whose every child is a leaf ("leaf modules", spec.md §4.1).
pub struct LeafModuleIter<'a> {
    inner: PreOrderIter<'a>,
}

impl<'a> LeafModuleIter<'a> {
    pub fn new(tree: &'a Tree, root: NodeId) -> Self {
        LeafModuleIter { inner: PreOrderIter::new(tree, root) }
    }
}

impl<'a> Iterator for LeafModuleIter<'a> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        for node in self.inner.by_ref() {
            if self.inner.tree.is_leaf(node) {
                continue;
            }
            let all_leaves =
                self.inner.tree.children(node).all(|c| self.inner.tree.is_leaf(c));
            if all_leaves {
                return Some(node);
            }
        }
        None
    }
}

/// One entry produced while crossing sub-engine boundaries: the tree owning the
/// node and the node itself. Exposed so result writers can address a leaf's data
/// wherever its owning arena actually lives.
pub struct InfomapTreeEntry<'a> {
    pub tree: &'a Tree,
    pub node: NodeId,
    pub path: Vec<u32>,
    pub depth: u32,
}

/// Depth-first walk that descends through sub-engines, substituting
/// `node.sub_engine.root` for `node`'s (absent) ordinary children and popping back
/// out through an explicit stack of frames on exit (spec.md §4.1, §9).
pub struct InfomapTreeIter<'a> {
    /// Each frame is (tree, remaining-siblings-stack, path-prefix, depth).
    frames: Vec<(&'a Tree, Vec<NodeId>, Vec<u32>, u32)>,
}

impl<'a> InfomapTreeIter<'a> {
    pub fn new(tree: &'a Tree, root: NodeId) -> Self {
        InfomapTreeIter { frames: vec![(tree, vec![root], Vec::new(), 0)] }
    }
}

impl<'a> Iterator for InfomapTreeIter<'a> {
    type Item = InfomapTreeEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.frames.len().checked_sub(1)?;
            let Some(node) = self.frames[top].1.pop() else {
                self.frames.pop();
                continue;
            };
            let entry_tree = self.frames[top].0;
            let path_prefix = self.frames[top].2.clone();
            let depth = self.frames[top].3;

            let mut path = path_prefix;
            // position among siblings within this arena
            let mut position = 1u32;
            let mut sib = entry_tree.parent(node).and_then(|p| entry_tree.first_child(p));
            while let Some(s) = sib {
                if s == node {
                    break;
                }
                position += 1;
                sib = entry_tree.next_sibling(s);
            }
            if entry_tree.parent(node).is_some() {
                path.push(position);
            }

            if let Some(sub) = entry_tree.sub_engine(node) {
                let sub_root = sub.tree.root().expect("sub-engine has a root");
                self.frames.push((&sub.tree, vec![sub_root], path.clone(), depth + 1));
            } else {
                let children: Vec<_> = entry_tree.children(node).collect();
                if !children.is_empty() {
                    let mut stack_children = children;
                    stack_children.reverse();
                    self.frames.push((entry_tree, stack_children, path.clone(), depth + 1));
                }
            }
            return Some(InfomapTreeEntry { tree: entry_tree, node, path, depth });
        }
    }
}

/// Merges state leaves sharing the same `physical_id` within one leaf module,
/// lazily, the way `original_source/src/core/infomapIterators.h`'s physical-leaf
/// walk folds memory-network state nodes back onto physical nodes for `.tree`
/// output.
pub struct PhysicalLeafIter<'a> {
    tree: &'a Tree,
    groups: std::vec::IntoIter<(u32, Vec<NodeId>)>,
}

impl<'a> PhysicalLeafIter<'a> {
    pub fn new(tree: &'a Tree, leaf_module: NodeId) -> Self {
        let mut by_physical: HashMap<u32, Vec<NodeId>> = HashMap::new();
        for leaf in tree.children(leaf_module) {
            by_physical.entry(tree.data(leaf).physical_id).or_default().push(leaf);
        }
        let mut groups: Vec<_> = by_physical.into_iter().collect();
        groups.sort_by_key(|(phys, _)| *phys);
        PhysicalLeafIter { tree, groups: groups.into_iter() }
    }
}

/// One physical node's worth of state leaves merged within a leaf module.
pub struct PhysicalLeaf {
    pub physical_id: u32,
    pub summed_flow: f64,
    pub members: Vec<NodeId>,
}

impl<'a> Iterator for PhysicalLeafIter<'a> {
    type Item = PhysicalLeaf;
    fn next(&mut self) -> Option<Self::Item> {
        let (physical_id, members) = self.groups.next()?;
        let summed_flow = members.iter().map(|&n| self.tree.data(n).flow.flow).sum();
        Some(PhysicalLeaf { physical_id, summed_flow, members })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeData;

    fn build_sample() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let m1 = tree.new_node(NodeData::default());
        let m2 = tree.new_node(NodeData::default());
        let a = tree.new_leaf(1.0, 0, 0, 0);
        let b = tree.new_leaf(1.0, 1, 1, 0);
        let c = tree.new_leaf(1.0, 2, 2, 0);
        tree.add_child(root, m1);
        tree.add_child(root, m2);
        tree.add_child(m1, a);
        tree.add_child(m1, b);
        tree.add_child(m2, c);
        tree.set_root(root);
        (tree, m1, m2, c)
    }

    #[test]
    fn pre_order_visits_parent_before_children() {
        let (tree, m1, m2, c) = build_sample();
        let root = tree.root().unwrap();
        let order: Vec<_> = PreOrderIter::new(&tree, root).collect();
        assert_eq!(order[0], root);
        assert!(order.iter().position(|&n| n == m1).unwrap() < order.iter().position(|&n| n == tree.first_child(m1).unwrap()).unwrap());
        assert!(order.contains(&m2));
        assert!(order.contains(&c));
    }

    #[test]
    fn leaf_iter_skips_modules() {
        let (tree, ..) = build_sample();
        let root = tree.root().unwrap();
        let leaves: Vec<_> = LeafIter::new(&tree, root).collect();
        assert_eq!(leaves.len(), 3);
        assert!(leaves.iter().all(|&l| tree.is_leaf(l)));
    }

    #[test]
    fn leaf_module_iter_finds_both_modules() {
        let (tree, m1, m2, _) = build_sample();
        let root = tree.root().unwrap();
        let modules: Vec<_> = LeafModuleIter::new(&tree, root).collect();
        assert_eq!(modules.len(), 2);
        assert!(modules.contains(&m1));
        assert!(modules.contains(&m2));
    }

    #[test]
    fn infomap_tree_iter_assigns_one_based_paths() {
        let (tree, ..) = build_sample();
        let root = tree.root().unwrap();
        let entries: Vec<_> = InfomapTreeIter::new(&tree, root).collect();
        // first module's first leaf has path [1, 1]
        let leaf_paths: Vec<_> =
            entries.iter().filter(|e| tree.is_leaf(e.node)).map(|e| e.path.clone()).collect();
        assert!(leaf_paths.contains(&vec![1, 1]));
        assert!(leaf_paths.contains(&vec![1, 2]));
        assert!(leaf_paths.contains(&vec![2, 1]));
    }

    #[test]
    fn physical_leaf_iter_merges_same_physical_id() {
        let mut tree = Tree::new();
        let module = tree.new_node(NodeData::default());
        let s0 = tree.new_leaf(0.3, 0, 7, 0);
        let s1 = tree.new_leaf(0.2, 1, 7, 1);
        let s2 = tree.new_leaf(0.1, 2, 9, 0);
        tree.add_child(module, s0);
        tree.add_child(module, s1);
        tree.add_child(module, s2);
        let merged: Vec<_> = PhysicalLeafIter::new(&tree, module).collect();
        assert_eq!(merged.len(), 2);
        let seven = merged.iter().find(|p| p.physical_id == 7).unwrap();
        assert_eq!(seven.members.len(), 2);
        assert!((seven.summed_flow - 0.5).abs() < 1e-12);
    }
}
