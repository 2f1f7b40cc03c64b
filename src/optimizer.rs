//! GreedyOptimizer (component D, spec.md §4.4): the per-level node-movement loop.
//!
//! Grounded on `original_source/src/core/GreedyOptimizer.h`'s move/aggregate/commit
//! shape and the teacher's own RNG idiom (`graph.rs`'s `rand_pcg::Pcg64` +
//! `rand::seq::SliceRandom::shuffle`, SPEC_FULL.md's Test Tooling section). The
//! `emptyModules` reachability mask is a `bitvec::vec::BitVec` alongside the LIFO
//! stack spec.md §3.3 already specifies (SPEC_FULL.md's Empty-module bitset note),
//! grounded on the teacher's own `bitvec` dependency.

use bitvec::vec::BitVec;
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::config::InfomapConfig;
use crate::objective::{DeltaFlow, Objective};
use crate::tree::{FlowData, NodeId, Tree};

/// Per-level optimizer state (spec.md §4.4 "State").
pub struct GreedyOptimizer<'a> {
    objective: &'a mut dyn Objective,
    /// Leaf (or module, when running on a super/sub-network) `NodeId`s of the
    /// active network, in active-index order.
    active_network: Vec<NodeId>,
    /// Source-major adjacency restricted to `active_network`'s own edges,
    /// addressed by active index rather than `NodeId`.
    adjacency: Vec<Vec<(u32, f64)>>,
    undirected: bool,
    module_flow_data: Vec<FlowData>,
    module_members: Vec<u32>,
    /// Tree node each active index currently reports as its module (the tree's
    /// `NodeData::temp_index` mirrors this; kept here too to avoid a tree lookup
    /// per move).
    current_module: Vec<u32>,
    empty_modules: Vec<u32>,
    empty_mask: BitVec,
    min_improvement: f64,
    min_single_node_improvement: f64,
    core_loop_limit: u32,
    inner_parallelization: bool,
    seed: u64,
    pass_counter: u64,
}

/// Step 2a-2b only: sum `idx`'s incident edge flow per candidate module. Takes
/// its operands as plain slices/bools (all `Sync`) rather than `&GreedyOptimizer`
/// so it can run inside a rayon parallel closure, where `&self` cannot —
/// `GreedyOptimizer` holds `&mut dyn Objective`, and `dyn Objective` carries no
/// `Sync` bound.
fn aggregate_edge_deltas(
    adjacency: &[Vec<(u32, f64)>],
    current_module: &[u32],
    undirected: bool,
    idx: u32,
) -> IndexMap<u32, DeltaFlow> {
    let own_module = current_module[idx as usize];
    let mut deltas: IndexMap<u32, DeltaFlow> = IndexMap::new();
    deltas.insert(own_module, DeltaFlow::new(own_module));

    for &(target, flow) in &adjacency[idx as usize] {
        let target_module = current_module[target as usize];
        let entry = deltas.entry(target_module).or_insert_with(|| DeltaFlow::new(target_module));
        entry.delta_exit += flow;
    }
    if undirected {
        for (source_idx, targets) in adjacency.iter().enumerate() {
            for &(target, flow) in targets {
                if target == idx {
                    let source_module = current_module[source_idx];
                    let entry =
                        deltas.entry(source_module).or_insert_with(|| DeltaFlow::new(source_module));
                    entry.delta_enter += flow;
                }
            }
        }
    }
    deltas
}

/// A snapshot taken at `consolidate_modules` time, restored by
/// `restore_consolidated_optimization_point_if_no_improvement` (spec.md §4.4).
pub struct ConsolidationSnapshot {
    module_flow_data: Vec<FlowData>,
    module_members: Vec<u32>,
    current_module: Vec<u32>,
    empty_modules: Vec<u32>,
    empty_mask: BitVec,
    codelength: f64,
}

impl<'a> GreedyOptimizer<'a> {
    /// Build the active network's adjacency from `network`'s edge flow restricted
    /// to `leaves` (by position: `leaves[i]` is active index `i`), and seed a
    /// singleton partition via `objective.init_partition` (spec.md §4.5 step 1).
    pub fn new(
        objective: &'a mut dyn Objective,
        tree: &Tree,
        leaves: Vec<NodeId>,
        edges: &[(u32, u32, f64)],
        undirected: bool,
        config: &InfomapConfig,
    ) -> Self {
        let n = leaves.len();
        let mut adjacency = vec![Vec::new(); n];
        for &(source, target, flow) in edges {
            adjacency[source as usize].push((target, flow));
        }

        let (module_flow_data, module_members) = objective.init_partition(tree, &leaves);
        let current_module: Vec<u32> = (0..n as u32).collect();

        GreedyOptimizer {
            objective,
            active_network: leaves,
            adjacency,
            undirected,
            module_flow_data,
            module_members,
            current_module,
            empty_modules: Vec::new(),
            empty_mask: BitVec::repeat(false, n),
            min_improvement: config.min_improvement,
            min_single_node_improvement: config.min_single_node_improvement,
            core_loop_limit: config.core_loop_limit,
            inner_parallelization: config.inner_parallelization,
            seed: config.seed,
            pass_counter: 0,
        }
    }

    pub fn codelength(&self) -> f64 {
        self.objective.codelength()
    }

    pub fn module_members(&self) -> &[u32] {
        &self.module_members
    }

    pub fn current_module(&self) -> &[u32] {
        &self.current_module
    }

    /// Repeats `try_move_each_node_into_best_module` until a pass moves no node,
    /// improves by less than `min_improvement`, or `core_loop_limit` is hit (spec.md
    /// §4.4). Returns the number of *effective* (improving) passes.
    pub fn optimize_active_network(&mut self, tree: &mut Tree) -> u32 {
        let mut effective_passes = 0;
        let mut pass = 0;
        loop {
            let codelength_before = self.objective.codelength();
            let moved = self.try_move_each_node_into_best_module(tree);
            pass += 1;
            let improvement = codelength_before - self.objective.codelength();
            log::trace!("optimizer pass {pass}: {moved} nodes moved, codelength -{improvement:.6}");
            if moved == 0 {
                break;
            }
            if improvement >= self.min_improvement {
                effective_passes += 1;
            } else {
                break;
            }
            if self.core_loop_limit != 0 && pass >= self.core_loop_limit {
                break;
            }
        }
        effective_passes
    }

    /// One pass over a random permutation of active indices (spec.md §4.4 step
    /// 2). Returns the number of nodes that moved.
    pub fn try_move_each_node_into_best_module(&mut self, tree: &mut Tree) -> u32 {
        let n = self.active_network.len();
        let mut order: Vec<u32> = (0..n as u32).collect();
        let mut rng = Pcg64::seed_from_u64(self.next_permutation_seed());
        order.shuffle(&mut rng);

        let candidates: Vec<(u32, Vec<DeltaFlow>)> = if self.inner_parallelization {
            self.compute_candidates_parallel(tree, &order)
        } else {
            order.iter().map(|&idx| (idx, self.best_candidates(tree, idx))).collect()
        };

        let mut moved = 0;
        for (idx, deltas) in candidates {
            if self.apply_best_candidate(tree, idx, &deltas) {
                moved += 1;
            }
        }
        moved
    }

    /// Deterministic per-pass seed derived from the pass count so repeated calls
    /// within one trial draw different permutations while the whole trial stays
    /// reproducible from its single `seed` (spec.md §5 "Ordering guarantees").
    fn next_permutation_seed(&mut self) -> u64 {
        self.pass_counter += 1;
        self.seed.wrapping_add(self.pass_counter)
    }

    /// Runs the parallelizable edge-aggregation half of candidate generation
    /// over `order` (`&adjacency`/`&current_module` are plain `Vec`s of `Sync`
    /// types), then enriches each result with `objective.add_memory_contributions`
    /// serially afterwards — `&mut dyn Objective` has no `Sync` bound, so that
    /// step can't run inside the parallel closure itself.
    fn compute_candidates_parallel(&self, tree: &Tree, order: &[u32]) -> Vec<(u32, Vec<DeltaFlow>)> {
        use rayon::prelude::*;
        let adjacency = &self.adjacency;
        let current_module = &self.current_module;
        let undirected = self.undirected;
        let mut candidates: Vec<(u32, IndexMap<u32, DeltaFlow>)> = order
            .par_iter()
            .map(|&idx| {
                (idx, aggregate_edge_deltas(adjacency, current_module, undirected, idx))
            })
            .collect();

        for (idx, deltas) in &mut candidates {
            self.add_memory_contributions(tree, *idx, deltas);
        }
        candidates.into_iter().map(|(idx, deltas)| (idx, deltas.into_values().collect())).collect()
    }

    fn best_candidates(&self, tree: &Tree, idx: u32) -> Vec<DeltaFlow> {
        self.aggregate_deltas(tree, idx)
    }

    fn add_memory_contributions(&self, tree: &Tree, idx: u32, deltas: &mut IndexMap<u32, DeltaFlow>) {
        let own_module = self.current_module[idx as usize];
        let node = self.active_network[idx as usize];
        let old_delta = deltas.get(&own_module).copied().unwrap_or(DeltaFlow::new(own_module));
        self.objective.add_memory_contributions(tree, node, &old_delta, deltas);
    }

    /// Step 2a-2c: aggregate this node's edge flow per candidate module, enrich
    /// with memory/multilayer cross-terms, and leave the delta-codelength
    /// evaluation for `apply_best_candidate` (which needs `&mut Tree`).
    fn aggregate_deltas(&self, tree: &Tree, idx: u32) -> Vec<DeltaFlow> {
        let mut deltas =
            aggregate_edge_deltas(&self.adjacency, &self.current_module, self.undirected, idx);
        self.add_memory_contributions(tree, idx, &mut deltas);
        deltas.into_values().collect()
    }

    /// Steps 2c-2e: evaluate every aggregated candidate's delta-codelength, pick
    /// the best with spec.md §4.4's tie-break rule, and commit the move if it
    /// clears `min_single_node_improvement`.
    fn apply_best_candidate(&mut self, tree: &mut Tree, idx: u32, deltas: &[DeltaFlow]) -> bool {
        let node = self.active_network[idx as usize];
        let own_module = self.current_module[idx as usize];
        let old_delta =
            deltas.iter().find(|d| d.module == own_module).copied().unwrap_or(DeltaFlow::new(own_module));

        let mut best: Option<(f64, DeltaFlow)> = None;
        for &candidate in deltas {
            if candidate.module == own_module {
                continue;
            }
            let delta = self.objective.delta_codelength_on_move(
                tree,
                node,
                &old_delta,
                &candidate,
                &self.module_flow_data,
                &self.module_members,
            );
            best = match best {
                None => Some((delta, candidate)),
                Some((best_delta, best_candidate)) => {
                    if delta < best_delta - 1e-15 {
                        Some((delta, candidate))
                    } else if (delta - best_delta).abs() <= 1e-15 {
                        // tie: prefer reducing non-trivial module count, else
                        // lowest module index (spec.md §4.4 step 2d).
                        let candidate_empties =
                            self.module_members[own_module as usize] == 1
                                && self.module_members[candidate.module as usize] == 0;
                        let best_empties = self.module_members[own_module as usize] == 1
                            && self.module_members[best_candidate.module as usize] == 0;
                        if candidate_empties && !best_empties {
                            Some((delta, candidate))
                        } else if candidate_empties == best_empties
                            && candidate.module < best_candidate.module
                        {
                            Some((delta, candidate))
                        } else {
                            Some((best_delta, best_candidate))
                        }
                    } else {
                        Some((best_delta, best_candidate))
                    }
                }
            };
        }

        let Some((delta, new_delta)) = best else { return false };
        if delta >= -self.min_single_node_improvement {
            return false;
        }

        let old_emptied = self.module_members[own_module as usize] == 1;
        self.objective.update_on_move(
            tree,
            node,
            &old_delta,
            &new_delta,
            &mut self.module_flow_data,
            &mut self.module_members,
        );
        self.current_module[idx as usize] = new_delta.module;

        if old_emptied {
            self.empty_modules.push(own_module);
            self.empty_mask.set(own_module as usize, true);
        }
        if self.empty_mask[new_delta.module as usize] {
            self.empty_mask.set(new_delta.module as usize, false);
            self.empty_modules.retain(|&m| m != new_delta.module);
        }
        true
    }

    /// Apply a caller-supplied assignment directly, without searching (spec.md
    /// §4.4's `move_active_nodes_to_predefined_modules`) — used to restore a saved
    /// partition.
    pub fn move_active_nodes_to_predefined_modules(&mut self, tree: &mut Tree, modules: &[u32]) {
        for idx in 0..self.active_network.len() as u32 {
            let target = modules[idx as usize];
            let own_module = self.current_module[idx as usize];
            if target == own_module {
                continue;
            }
            let node = self.active_network[idx as usize];
            let deltas = self.aggregate_deltas(tree, idx);
            let old_delta = deltas
                .iter()
                .find(|d| d.module == own_module)
                .copied()
                .unwrap_or_else(|| DeltaFlow::new(own_module));
            let new_delta = deltas
                .iter()
                .find(|d| d.module == target)
                .copied()
                .unwrap_or_else(|| DeltaFlow::new(target));
            self.objective.update_on_move(
                tree,
                node,
                &old_delta,
                &new_delta,
                &mut self.module_flow_data,
                &mut self.module_members,
            );
            self.current_module[idx as usize] = target;
        }
    }

    /// Snapshot the current optimization point (spec.md §4.4's
    /// `restore_consolidated_optimization_point_if_no_improvement`).
    pub fn snapshot(&self) -> ConsolidationSnapshot {
        ConsolidationSnapshot {
            module_flow_data: self.module_flow_data.clone(),
            module_members: self.module_members.clone(),
            current_module: self.current_module.clone(),
            empty_modules: self.empty_modules.clone(),
            empty_mask: self.empty_mask.clone(),
            codelength: self.objective.codelength(),
        }
    }

    /// Roll back to `snapshot` if `force` or the current codelength is not a
    /// strict improvement over it. Returns whether a rollback happened.
    pub fn restore_consolidated_optimization_point_if_no_improvement(
        &mut self,
        tree: &mut Tree,
        snapshot: &ConsolidationSnapshot,
        force: bool,
    ) -> bool {
        if !force && self.objective.codelength() < snapshot.codelength - self.min_improvement {
            return false;
        }
        // Replay the move through `objective.update_on_move` so its internal
        // codelength terms land back in sync with `module_flow_data`, rather than
        // overwriting them directly and leaving the objective's own bookkeeping
        // stale.
        self.move_active_nodes_to_predefined_modules(tree, &snapshot.current_module);
        self.empty_modules = snapshot.empty_modules.clone();
        self.empty_mask = snapshot.empty_mask.clone();
        true
    }

    /// Create one tree node per non-empty module index, reparent the active
    /// nodes under it, and install the modules as the new active network (spec.md
    /// §4.4's `consolidate_modules`).
    pub fn consolidate_modules(&mut self, tree: &mut Tree) -> Vec<NodeId> {
        let num_modules = self.module_flow_data.len();
        let mut module_nodes: Vec<Option<NodeId>> = vec![None; num_modules];

        for idx in 0..self.active_network.len() {
            let module = self.current_module[idx] as usize;
            if self.module_members[module] == 0 {
                continue;
            }
            let module_node = *module_nodes[module].get_or_insert_with(|| {
                tree.new_node(crate::tree::NodeData {
                    flow: self.module_flow_data[module],
                    ..Default::default()
                })
            });
            tree.reparent(self.active_network[idx], module_node);
        }

        let modules: Vec<NodeId> = module_nodes.into_iter().flatten().collect();
        self.objective.consolidate_modules(tree, &modules);
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowCalculator;
    use crate::network::test_utils::undirected;
    use crate::objective::MapEq;
    use crate::tree::NodeData;

    fn build_leaf_tree(
        n: usize,
        node_flow: &[f64],
        node_enter_flow: &[f64],
        node_exit_flow: &[f64],
    ) -> (Tree, Vec<NodeId>) {
        let mut tree = Tree::new();
        let mut leaves = Vec::new();
        for i in 0..n {
            let leaf = tree.new_leaf(node_flow[i], i as u32, i as u32, 0);
            tree.data_mut(leaf).flow.enter_flow = node_enter_flow[i];
            tree.data_mut(leaf).flow.exit_flow = node_exit_flow[i];
            leaves.push(leaf);
        }
        (tree, leaves)
    }

    #[test]
    fn ring_optimization_merges_into_one_module() {
        let network = undirected(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)]);
        let config = InfomapConfig::default();
        let flow = FlowCalculator::calculate(&network, &config);

        let (mut tree, leaves) = build_leaf_tree(
            4,
            &flow.node_flow,
            &flow.node_enter_flow,
            &flow.node_exit_flow,
        );
        let edges: Vec<(u32, u32, f64)> =
            flow.edges.iter().map(|e| (e.source, e.target, e.flow)).collect();

        let mut objective = MapEq::default();
        objective.init(&config);
        objective.init_network(&tree, &leaves);

        let mut optimizer =
            GreedyOptimizer::new(&mut objective, &tree, leaves.clone(), &edges, true, &config);
        optimizer.optimize_active_network(&mut tree);

        let distinct_modules: std::collections::HashSet<u32> =
            optimizer.current_module().iter().copied().collect();
        assert_eq!(distinct_modules.len(), 1, "a symmetric ring should collapse to one module");
    }

    #[test]
    fn disconnected_nodes_stay_in_separate_modules() {
        let network = undirected(3, &[]);
        let config = InfomapConfig::default();
        let flow = FlowCalculator::calculate(&network, &config);
        let (mut tree, leaves) = build_leaf_tree(
            3,
            &flow.node_flow,
            &flow.node_enter_flow,
            &flow.node_exit_flow,
        );

        let mut objective = MapEq::default();
        objective.init(&config);
        objective.init_network(&tree, &leaves);

        let mut optimizer = GreedyOptimizer::new(&mut objective, &tree, leaves.clone(), &[], true, &config);
        optimizer.optimize_active_network(&mut tree);

        let distinct_modules: std::collections::HashSet<u32> =
            optimizer.current_module().iter().copied().collect();
        assert_eq!(distinct_modules.len(), 3);
    }
}
