//! Arena of tree nodes with parent/sibling/child links (spec.md §3.1, §4.1).
//!
//! Grounded on the `Arena<T>` / `NodeHierarchy` split in
//! `examples/other_examples/89e16b16_fschutt-azul__azul-src-id_tree.rs.rs`: topology
//! (parent / sibling / child indices) lives separately from the payload, both as
//! flat `Vec`s indexed by a `NodeId` newtype, so splicing operations are `O(1)`
//! pointer (index) rewrites with no lifetime hazards.

pub mod flow_data;
pub mod iter;

use serde::{Deserialize, Serialize};

pub use flow_data::{FlowData, LayerTeleFlowData, MultiFlowData, PhysData};

use crate::error::InternalError;

/// Index of a node within a single [`Tree`]'s arena. Never valid across two
/// different `Tree` instances (sub-engines own a wholly separate arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeLinks {
    parent: Option<NodeId>,
    previous: Option<NodeId>,
    next: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    collapsed_first_child: Option<NodeId>,
    collapsed_last_child: Option<NodeId>,
    child_degree: u32,
    /// Tombstoned nodes (removed by `replace_with_children`) are skipped by every
    /// iterator and their slot is never reused mid-level, since `GreedyOptimizer`
    /// addresses leaves by `NodeId` for the lifetime of a level.
    live: bool,
}

/// The payload carried by every node, leaf or interior (spec.md §3.1).
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub flow: FlowData,
    pub multi_flow: Option<MultiFlowData>,
    /// Unique among leaves; stable identity used by result writers.
    pub state_id: u32,
    /// May repeat across leaves in memory/multilayer networks.
    pub physical_id: u32,
    pub layer_id: u32,
    /// Categorical meta-attribute used by `MetaMapEq` (spec.md §3.4); absent for
    /// leaves outside a meta-data run and for every interior node.
    pub meta_category: Option<i64>,
    pub name: Option<String>,
    /// Temporary index used by the optimizer to track current module assignment.
    pub temp_index: u32,
    pub dirty: bool,
    /// Memory-objective physical-node aggregation list (spec.md §3.1, §3.4).
    pub physical_nodes: Vec<PhysData>,
}

impl NodeData {
    pub fn leaf(flow: f64, state_id: u32, physical_id: u32, layer_id: u32) -> Self {
        NodeData {
            flow: FlowData::with_flow(flow),
            state_id,
            physical_id,
            layer_id,
            ..Default::default()
        }
    }
}

/// A nested Infomap instance standing in for a subtree (spec.md §3.1's
/// `sub_engine`, §9's "composite tree + index"). Stored in a side table keyed by
/// the node it replaces, rather than as a field of that node, so `Tree` never needs
/// a self-referential or cross-arena pointer (I4's "never both" is enforced by
/// `Tree::attach_sub_engine`/`Tree::detach_sub_engine`).
#[derive(Debug, Clone)]
pub struct SubEngine {
    pub tree: Tree,
    /// Hierarchical codelength of this sub-level, used by
    /// `InfomapEngine::hierarchical_partition` to decide whether to keep it
    /// (spec.md §4.7).
    pub codelength: f64,
}

/// Arena of tree nodes for one Infomap level (spec.md §3.1).
#[derive(Debug, Clone, Default)]
pub struct Tree {
    links: Vec<NodeLinks>,
    data: Vec<NodeData>,
    sub_engines: hashbrown::HashMap<NodeId, Box<SubEngine>>,
    root: Option<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Tree::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self, node: NodeId) -> &NodeData {
        &self.data[node.idx()]
    }

    pub fn data_mut(&mut self, node: NodeId) -> &mut NodeData {
        &mut self.data[node.idx()]
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.links[node.idx()].parent
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.links[node.idx()].next
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.links[node.idx()].previous
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.links[node.idx()].first_child
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.links[node.idx()].last_child
    }

    pub fn child_degree(&self, node: NodeId) -> u32 {
        self.links[node.idx()].child_degree
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.links[node.idx()].first_child.is_none() && !self.has_sub_engine(node)
    }

    pub fn is_live(&self, node: NodeId) -> bool {
        self.links[node.idx()].live
    }

    pub fn has_sub_engine(&self, node: NodeId) -> bool {
        self.sub_engines.contains_key(&node)
    }

    pub fn sub_engine(&self, node: NodeId) -> Option<&SubEngine> {
        self.sub_engines.get(&node).map(|b| b.as_ref())
    }

    pub fn sub_engine_mut(&mut self, node: NodeId) -> Option<&mut SubEngine> {
        self.sub_engines.get_mut(&node).map(|b| b.as_mut())
    }

    /// Allocate a fresh, parentless node. Does not touch `root`.
    pub fn new_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.links.len() as u32);
        self.links.push(NodeLinks { live: true, ..Default::default() });
        self.data.push(data);
        id
    }

    pub fn new_leaf(&mut self, flow: f64, state_id: u32, physical_id: u32, layer_id: u32) -> NodeId {
        self.new_node(NodeData::leaf(flow, state_id, physical_id, layer_id))
    }

    /// Append `child` to `parent`'s sibling list (spec.md §4.1).
    ///
    /// # Panics
    /// If `child` already has a parent (I2 precondition).
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        assert!(self.links[child.idx()].parent.is_none(), "child already has a parent");
        assert!(
            !self.has_sub_engine(parent),
            "cannot add an ordinary child to a node with a sub-engine (I4)"
        );
        self.links[child.idx()].parent = Some(parent);
        let last = self.links[parent.idx()].last_child;
        match last {
            Some(last) => {
                self.links[last.idx()].next = Some(child);
                self.links[child.idx()].previous = Some(last);
            }
            None => {
                self.links[parent.idx()].first_child = Some(child);
            }
        }
        self.links[parent.idx()].last_child = Some(child);
        self.links[parent.idx()].child_degree += 1;
    }

    /// Detach `node` from its current parent (if any) and append it under
    /// `new_parent`, used by `GreedyOptimizer::consolidate_modules` (spec.md §4.4)
    /// when a level is re-consolidated and by fine-tune re-partitioning (§4.6),
    /// where leaves already live under a previous module layer.
    pub fn reparent(&mut self, node: NodeId, new_parent: NodeId) {
        if self.links[node.idx()].parent.is_some() {
            self.unlink(node);
        }
        self.add_child(new_parent, node);
    }

    /// Detach `node` from its parent's sibling chain without deleting it. Used
    /// internally by `replace_with_children` and `remove_node`.
    fn unlink(&mut self, node: NodeId) {
        let NodeLinks { parent, previous, next, .. } = self.links[node.idx()];
        match previous {
            Some(prev) => self.links[prev.idx()].next = next,
            None => {
                if let Some(parent) = parent {
                    self.links[parent.idx()].first_child = next;
                }
            }
        }
        match next {
            Some(nxt) => self.links[nxt.idx()].previous = previous,
            None => {
                if let Some(parent) = parent {
                    self.links[parent.idx()].last_child = previous;
                }
            }
        }
        if let Some(parent) = parent {
            self.links[parent.idx()].child_degree -= 1;
        }
        self.links[node.idx()].parent = None;
        self.links[node.idx()].previous = None;
        self.links[node.idx()].next = None;
    }

    fn tombstone(&mut self, node: NodeId) {
        self.links[node.idx()].live = false;
        self.links[node.idx()].first_child = None;
        self.links[node.idx()].last_child = None;
        self.links[node.idx()].child_degree = 0;
    }

    /// Splice `node`'s children into `node`'s position among its own siblings, then
    /// delete `node` (spec.md §4.1). Returns `false` (a no-op) if `node` is a leaf
    /// or the root, `true` otherwise.
    pub fn replace_with_children(&mut self, node: NodeId) -> bool {
        if self.is_leaf(node) || self.links[node.idx()].parent.is_none() {
            return false;
        }
        let parent = self.links[node.idx()].parent.unwrap();
        let before = self.links[node.idx()].previous;
        let after = self.links[node.idx()].next;

        let mut child = self.links[node.idx()].first_child;
        self.unlink(node);

        let mut previous = before;
        while let Some(current) = child {
            let next_child = self.links[current.idx()].next;
            self.links[current.idx()].parent = Some(parent);
            self.links[current.idx()].previous = previous;
            match previous {
                Some(prev) => self.links[prev.idx()].next = Some(current),
                None => self.links[parent.idx()].first_child = Some(current),
            }
            self.links[parent.idx()].child_degree += 1;
            previous = Some(current);
            child = next_child;
        }
        match previous {
            Some(last) => {
                self.links[last.idx()].next = after;
                if let Some(after_node) = after {
                    self.links[after_node.idx()].previous = Some(last);
                } else {
                    self.links[parent.idx()].last_child = Some(last);
                }
            }
            None => {
                // node had no children after all (shouldn't happen, is_leaf guards this)
                if let Some(after_node) = after {
                    self.links[after_node.idx()].previous = before;
                }
                match before {
                    Some(b) => self.links[b.idx()].next = after,
                    None => self.links[parent.idx()].first_child = after,
                }
                if after.is_none() {
                    self.links[parent.idx()].last_child = before;
                }
            }
        }
        self.tombstone(node);
        true
    }

    /// Apply `replace_with_children` to every child of `node`. Returns the number
    /// of module nodes removed (spec.md §4.1), used by `consolidateModules`'s
    /// counterpart when re-opening a level (fine-tune, spec.md §4.6).
    pub fn replace_children_with_grandchildren(&mut self, node: NodeId) -> usize {
        let mut removed = 0;
        let mut child = self.links[node.idx()].first_child;
        while let Some(current) = child {
            let next = self.links[current.idx()].next;
            if self.replace_with_children(current) {
                removed += 1;
            }
            child = next;
        }
        removed
    }

    /// Move `node`'s children aside to hide them temporarily (spec.md §4.1).
    pub fn collapse_children(&mut self, node: NodeId) -> Result<(), InternalError> {
        let links = &mut self.links[node.idx()];
        if links.first_child.is_none() {
            return Err(InternalError::CollapseOnLeaf(node));
        }
        links.collapsed_first_child = links.first_child.take();
        links.collapsed_last_child = links.last_child.take();
        links.child_degree = 0;
        Ok(())
    }

    /// Restore children hidden by `collapse_children`.
    pub fn expand_children(&mut self, node: NodeId) -> Result<(), InternalError> {
        let links = &mut self.links[node.idx()];
        if links.first_child.is_some() {
            return Err(InternalError::ExpandOnLiveNode(node));
        }
        links.first_child = links.collapsed_first_child.take();
        links.last_child = links.collapsed_last_child.take();
        let mut degree = 0;
        let mut cur = links.first_child;
        drop(links);
        while let Some(c) = cur {
            degree += 1;
            cur = self.links[c.idx()].next;
        }
        self.links[node.idx()].child_degree = degree;
        Ok(())
    }

    /// Children of `node`, in sibling order.
    pub fn children(&self, node: NodeId) -> iter::SiblingIter<'_> {
        iter::SiblingIter::new(self, self.links[node.idx()].first_child)
    }

    /// 1-based child-index path from `node`'s parent down to `node`, within this
    /// tree only (does not cross sub-engine boundaries; callers composing a global
    /// path across sub-engines concatenate these segments, spec.md §4.1).
    pub fn path_within(&self, node: NodeId) -> Vec<u32> {
        let mut path = Vec::new();
        let mut current = node;
        while let Some(parent) = self.links[current.idx()].parent {
            let mut position = 1u32;
            let mut sib = self.links[parent.idx()].first_child;
            while let Some(s) = sib {
                if s == current {
                    break;
                }
                position += 1;
                sib = self.links[s.idx()].next;
            }
            path.push(position);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Attach `sub` as the substitute for `node`'s subtree (I4: `node` must not
    /// already have ordinary children).
    pub fn attach_sub_engine(&mut self, node: NodeId, sub: SubEngine) -> Result<(), InternalError> {
        if self.links[node.idx()].first_child.is_some() {
            return Err(InternalError::ChildrenAndSubEngine(node));
        }
        self.sub_engines.insert(node, Box::new(sub));
        Ok(())
    }

    pub fn detach_sub_engine(&mut self, node: NodeId) -> Option<SubEngine> {
        self.sub_engines.remove(&node).map(|b| *b)
    }

    /// Check invariants I1-I5 over the whole arena (spec.md §3.1, §8 P5). Only used
    /// by tests and debug assertions; a failure here is always an engine bug.
    pub fn check_invariants(&self) -> Result<(), InternalError> {
        for (i, links) in self.links.iter().enumerate() {
            if !links.live {
                continue;
            }
            let node = NodeId(i as u32);
            if links.first_child.is_none() != links.last_child.is_none() {
                return Err(InternalError::ChildDegreeMismatch(node, 0, 0));
            }
            if links.first_child.is_none() && links.child_degree != 0 {
                return Err(InternalError::ChildDegreeMismatch(node, links.child_degree, 0));
            }
            if self.has_sub_engine(node) && links.first_child.is_some() {
                return Err(InternalError::ChildrenAndSubEngine(node));
            }
            let mut walked = 0u32;
            let mut child = links.first_child;
            let mut last_seen = None;
            while let Some(c) = child {
                if self.links[c.idx()].parent != Some(node) {
                    return Err(InternalError::ChildDegreeMismatch(node, links.child_degree, walked));
                }
                walked += 1;
                last_seen = Some(c);
                child = self.links[c.idx()].next;
            }
            if walked != links.child_degree {
                return Err(InternalError::ChildDegreeMismatch(node, links.child_degree, walked));
            }
            if last_seen != links.last_child {
                return Err(InternalError::ChildDegreeMismatch(node, links.child_degree, walked));
            }
        }
        Ok(())
    }

    /// P1/I3: every interior node's flow equals the sum of its subtree leaves'
    /// flow, within tolerance. Recursion here is test/debug-only (bounded by the
    /// tree's own depth, never called from the hot optimizer path).
    pub fn check_flow_conservation(&self, node: NodeId, tolerance: f64) -> Result<f64, InternalError> {
        if self.is_leaf(node) {
            if let Some(sub) = self.sub_engine(node) {
                let root = sub.tree.root().expect("sub-engine has a root");
                return sub.tree.check_flow_conservation(root, tolerance);
            }
            return Ok(self.data(node).flow.flow);
        }
        let mut sum = 0.0;
        for child in self.children(node).collect::<Vec<_>>() {
            sum += self.check_flow_conservation(child, tolerance)?;
        }
        let own = self.data(node).flow.flow;
        if (own - sum).abs() > tolerance {
            return Err(InternalError::FlowNotConserved(node, own, sum));
        }
        Ok(own)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut Tree, flow: f64, id: u32) -> NodeId {
        tree.new_leaf(flow, id, id, 0)
    }

    #[test]
    fn add_child_maintains_sibling_chain() {
        let mut tree = Tree::new();
        let parent = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        let b = leaf(&mut tree, 1.0, 1);
        let c = leaf(&mut tree, 1.0, 2);
        tree.add_child(parent, a);
        tree.add_child(parent, b);
        tree.add_child(parent, c);
        assert_eq!(tree.child_degree(parent), 3);
        let children: Vec<_> = tree.children(parent).collect();
        assert_eq!(children, vec![a, b, c]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn replace_with_children_splices_grandchildren_up() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        let b = leaf(&mut tree, 1.0, 1);
        tree.add_child(root, module);
        tree.add_child(module, a);
        tree.add_child(module, b);

        assert!(tree.replace_with_children(module));
        assert_eq!(tree.child_degree(root), 2);
        let children: Vec<_> = tree.children(root).collect();
        assert_eq!(children, vec![a, b]);
        assert!(!tree.is_live(module));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn replace_with_children_noop_on_leaf_or_root() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        tree.add_child(root, a);
        assert!(!tree.replace_with_children(a)); // leaf
        assert!(!tree.replace_with_children(root)); // root
    }

    #[test]
    fn replace_with_children_preserves_order_with_siblings() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let before = leaf(&mut tree, 1.0, 0);
        let module = tree.new_node(NodeData::default());
        let after = leaf(&mut tree, 1.0, 3);
        let a = leaf(&mut tree, 1.0, 1);
        let b = leaf(&mut tree, 1.0, 2);
        tree.add_child(root, before);
        tree.add_child(root, module);
        tree.add_child(root, after);
        tree.add_child(module, a);
        tree.add_child(module, b);

        tree.replace_with_children(module);
        let children: Vec<_> = tree.children(root).collect();
        assert_eq!(children, vec![before, a, b, after]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn path_within_is_one_based() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let module = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        let b = leaf(&mut tree, 1.0, 1);
        tree.add_child(root, module);
        tree.add_child(module, a);
        tree.add_child(module, b);
        assert_eq!(tree.path_within(module), vec![1]);
        assert_eq!(tree.path_within(b), vec![1, 2]);
    }

    #[test]
    fn collapse_and_expand_round_trips() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        let b = leaf(&mut tree, 1.0, 1);
        tree.add_child(root, a);
        tree.add_child(root, b);
        tree.collapse_children(root).unwrap();
        assert!(tree.is_leaf(root));
        tree.expand_children(root).unwrap();
        assert_eq!(tree.child_degree(root), 2);
        let children: Vec<_> = tree.children(root).collect();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn flow_conservation_holds_for_balanced_tree() {
        let mut tree = Tree::new();
        let root = tree.new_node(NodeData { flow: FlowData::with_flow(1.0), ..Default::default() });
        let module = tree.new_node(NodeData { flow: FlowData::with_flow(0.5), ..Default::default() });
        let a = leaf(&mut tree, 0.25, 0);
        let b = leaf(&mut tree, 0.25, 1);
        let c = leaf(&mut tree, 0.5, 2);
        tree.add_child(root, module);
        tree.add_child(module, a);
        tree.add_child(module, b);
        tree.add_child(root, c);
        tree.set_root(root);
        tree.check_flow_conservation(root, 1e-12).unwrap();
    }

    #[test]
    fn reparent_moves_node_from_old_parent_to_new() {
        let mut tree = Tree::new();
        let old_module = tree.new_node(NodeData::default());
        let new_module = tree.new_node(NodeData::default());
        let a = leaf(&mut tree, 1.0, 0);
        tree.add_child(old_module, a);
        assert_eq!(tree.child_degree(old_module), 1);

        tree.reparent(a, new_module);
        assert_eq!(tree.child_degree(old_module), 0);
        assert_eq!(tree.child_degree(new_module), 1);
        assert_eq!(tree.parent(a), Some(new_module));
    }
}
