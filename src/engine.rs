//! InfomapEngine (component E, spec.md §4.5-§4.8): orchestrates levels, fine/coarse
//! tune, hierarchical recursion, and best-of-`N` trials.
//!
//! Grounded on `original_source/src/core/InfomapCore.h`'s `run`/`runPartition`/
//! `tune`/`hierarchicalPartition` shape. Each trial owns its own [`Tree`] and
//! [`Box<dyn Objective>`] (spec.md §5: "each trial owns its own tree, objective,
//! optimizer, and RNG state. No shared mutable state"); trials themselves run
//! serially here rather than over `rayon`, since [`Objective`] carries no `Send`
//! bound (SPEC_FULL.md "Trial parallelism" note, DESIGN.md).

use hashbrown::HashMap;

use crate::config::InfomapConfig;
use crate::error::Error;
use crate::flow::FlowCalculator;
use crate::math::plogp;
use crate::network::Network;
use crate::objective::{Objective, ObjectiveKind};
use crate::optimizer::GreedyOptimizer;
use crate::partition_queue::PartitionQueue;
use crate::tree::{FlowData, NodeData, NodeId, SubEngine, Tree};

/// The result of one trial (spec.md §4.8): a finished hierarchical tree plus the
/// scalars an embedder reads off it (spec.md §6).
#[derive(Debug)]
pub struct Trial {
    pub tree: Tree,
    /// Flat (two-level) codelength of the top partition.
    pub codelength: f64,
    /// Hierarchical codelength (spec.md §4.7's `calcCodelengthOnTree(true)`).
    pub hierarchical_codelength: f64,
    pub seed: u64,
}

/// Drives one or more trials over a finalized network and keeps the best (spec.md
/// §4.8).
pub struct InfomapEngine {
    config: InfomapConfig,
    objective_kind: ObjectiveKind,
}

impl InfomapEngine {
    pub fn new(config: InfomapConfig, objective_kind: ObjectiveKind) -> Self {
        InfomapEngine { config, objective_kind }
    }

    /// Validate `config`, finalize `network`, run `config.num_trials` independent
    /// trials, and return the one with the lowest hierarchical codelength (spec.md
    /// §4.8).
    pub fn run(&self, network: Network) -> Result<Trial, Error> {
        self.config.validate()?;
        let network =
            network.finalize(self.config.include_self_links, self.config.weight_threshold)?;

        let mut best: Option<Trial> = None;
        for trial_index in 0..self.config.num_trials {
            let seed = self.config.seed.wrapping_add(trial_index as u64);
            let trial = self.run_trial(&network, seed);
            best = Some(match best {
                None => trial,
                Some(current_best) => {
                    if trial.hierarchical_codelength < current_best.hierarchical_codelength {
                        trial
                    } else {
                        current_best
                    }
                }
            });
        }
        Ok(best.expect("num_trials >= 1 is enforced by InfomapConfig::validate"))
    }

    fn run_trial(&self, network: &Network, seed: u64) -> Trial {
        log::info!("starting trial with seed {seed}");
        let mut config = self.config.clone();
        config.seed = seed;

        let flow = FlowCalculator::calculate(network, &config);
        let (mut tree, leaves, edges) = build_leaf_tree(network, &flow);
        let undirected = !config.flow_model.is_directed();

        let mut objective = self.objective_kind.build();
        objective.init(&config);

        let root = self.partition_to_two_levels(
            &mut tree,
            leaves.clone(),
            &edges,
            undirected,
            objective.as_mut(),
            &config,
        );
        let initial_two_level_codelength = objective.codelength();

        self.tune(
            &mut tree,
            root,
            &leaves,
            &edges,
            undirected,
            objective.as_mut(),
            &config,
            initial_two_level_codelength,
        );

        let codelength =
            self.maybe_collapse_to_one_module(&mut tree, root, &leaves, objective.codelength(), &config);

        if config.run_sub_module_recursion() {
            self.super_module_recursion(&mut tree, root, &leaves, &edges, undirected, &config);
            self.sub_module_recursion(&mut tree, root, &leaves, &edges, undirected, &config, seed);
        }

        let hierarchical_codelength = self.hierarchical_codelength(&tree, true);
        log::info!("trial seed {seed} finished: codelength {hierarchical_codelength:.6}");
        Trial { tree, codelength, hierarchical_codelength, seed }
    }

    /// spec.md §4.5: `initPartition` (singleton) → `optimizeActiveNetwork` →
    /// `consolidateModules`, with the resulting modules spliced under a fresh root.
    fn partition_to_two_levels(
        &self,
        tree: &mut Tree,
        leaves: Vec<NodeId>,
        edges: &[(u32, u32, f64)],
        undirected: bool,
        objective: &mut dyn Objective,
        config: &InfomapConfig,
    ) -> NodeId {
        objective.init_network(tree, &leaves);
        let modules = {
            let mut optimizer = GreedyOptimizer::new(objective, tree, leaves, edges, undirected, config);
            optimizer.optimize_active_network(tree);
            optimizer.consolidate_modules(tree)
        };
        attach_root(tree, &modules)
    }

    /// spec.md §4.6: alternate fine-tune (reopen all modules, re-optimize from
    /// scratch) and coarse-tune (freeze modules, optimize at module level, then
    /// flatten the redundant layer back out) until a full iteration's improvement
    /// falls below `tune_iteration_relative_threshold · initial_two_level_codelength`
    /// or `tune_iteration_limit` is hit.
    fn tune(
        &self,
        tree: &mut Tree,
        root: NodeId,
        leaves: &[NodeId],
        edges: &[(u32, u32, f64)],
        undirected: bool,
        objective: &mut dyn Objective,
        config: &InfomapConfig,
        initial_two_level_codelength: f64,
    ) {
        let limit = if config.tune_iteration_limit == 0 { u32::MAX } else { config.tune_iteration_limit };
        for iteration in 0..limit {
            let before = objective.codelength();

            tree.replace_children_with_grandchildren(root);
            objective.init_network(tree, leaves);
            let modules = {
                let mut optimizer =
                    GreedyOptimizer::new(objective, tree, leaves.to_vec(), edges, undirected, config);
                optimizer.optimize_active_network(tree);
                optimizer.consolidate_modules(tree)
            };
            for &module in &modules {
                tree.add_child(root, module);
            }

            if config.run_coarse_tune() {
                let (level_modules, module_edges) = build_module_level_network(tree, root, leaves, edges);
                if level_modules.len() > 1 {
                    objective.init_super_network(tree, &level_modules);
                    let super_modules = {
                        let mut optimizer = GreedyOptimizer::new(
                            objective,
                            tree,
                            level_modules.clone(),
                            &module_edges,
                            undirected,
                            config,
                        );
                        optimizer.optimize_active_network(tree);
                        optimizer.consolidate_modules(tree)
                    };
                    for &super_module in &super_modules {
                        tree.replace_children_with_grandchildren(super_module);
                        tree.add_child(root, super_module);
                    }
                }
            }

            let improvement = before - objective.codelength();
            log::debug!("tune iteration {iteration}: codelength {:.6} (-{improvement:.6})", objective.codelength());
            if improvement < config.tune_iteration_relative_threshold * initial_two_level_codelength {
                break;
            }
        }
    }

    /// spec.md §6's `prefer_modular_solution`: fall back to a single top module when
    /// that is strictly cheaper and the caller has not asked to keep structure
    /// regardless.
    fn maybe_collapse_to_one_module(
        &self,
        tree: &mut Tree,
        root: NodeId,
        leaves: &[NodeId],
        modular_codelength: f64,
        config: &InfomapConfig,
    ) -> f64 {
        if config.prefer_modular_solution || leaves.len() < 2 {
            return modular_codelength;
        }
        let total_flow: f64 = leaves.iter().map(|&l| tree.data(l).flow.flow).sum();
        let node_flow_log_node_flow: f64 =
            leaves.iter().map(|&l| plogp(tree.data(l).flow.flow)).sum();
        let one_module_codelength = plogp(total_flow) - node_flow_log_node_flow;

        if one_module_codelength >= modular_codelength - 1e-12 {
            return modular_codelength;
        }

        tree.replace_children_with_grandchildren(root);
        let module = tree.new_node(NodeData {
            flow: FlowData { flow: total_flow, ..Default::default() },
            ..Default::default()
        });
        for &leaf in leaves {
            tree.reparent(leaf, module);
        }
        tree.add_child(root, module);
        one_module_codelength
    }

    /// spec.md §4.7 step 2: repeatedly run a fresh engine on the current top
    /// modules (their flows and module-to-module aggregated flow), splicing the
    /// result in as a new top layer while it strictly coarsens the partition.
    fn super_module_recursion(
        &self,
        tree: &mut Tree,
        root: NodeId,
        leaves: &[NodeId],
        edges: &[(u32, u32, f64)],
        undirected: bool,
        config: &InfomapConfig,
    ) {
        let mut depth = 0u32;
        loop {
            if config.level_limit != 0 && depth >= config.level_limit {
                break;
            }
            let (modules, module_edges) = build_module_level_network(tree, root, leaves, edges);
            if modules.len() <= 1 {
                break;
            }

            let mut objective = self.objective_kind.build();
            objective.init(config);
            objective.init_super_network(tree, &modules);
            let super_modules = {
                let mut optimizer = GreedyOptimizer::new(
                    objective.as_mut(),
                    tree,
                    modules.clone(),
                    &module_edges,
                    undirected,
                    config,
                );
                optimizer.optimize_active_network(tree);
                optimizer.consolidate_modules(tree)
            };

            if super_modules.len() < 2 || super_modules.len() >= modules.len() {
                // No further coarsening: splice the unchanged modules straight back
                // under root and stop (consolidate_modules already detached them
                // from root into the rejected super_modules).
                for &module in &modules {
                    tree.reparent(module, root);
                }
                break;
            }
            for &super_module in &super_modules {
                tree.add_child(root, super_module);
            }
            depth += 1;
            log::debug!(
                "super-module recursion depth {depth}: {} modules coarsened to {}",
                modules.len(),
                super_modules.len()
            );
        }
    }

    /// spec.md §4.7 step 3: breadth-first over the current top modules, attempting
    /// a sub-engine for each; a sub-engine fully resolves its own nested structure
    /// (recursively) before the caller decides whether it beats the flat baseline.
    fn sub_module_recursion(
        &self,
        tree: &mut Tree,
        root: NodeId,
        leaves: &[NodeId],
        edges: &[(u32, u32, f64)],
        undirected: bool,
        config: &InfomapConfig,
        seed: u64,
    ) {
        let mut queue = PartitionQueue::new();
        for module in tree.children(root).collect::<Vec<_>>() {
            queue.push(module);
        }

        let mut next_seed = seed;
        loop {
            if queue.is_empty() {
                break;
            }
            queue.begin_level();
            let mut modules = Vec::new();
            while let Some(module) = queue.pop() {
                modules.push(module);
            }

            for module in modules {
                next_seed = next_seed.wrapping_add(1);
                match self.try_build_sub_engine(tree, module, leaves, edges, undirected, config, next_seed)
                {
                    Some((mut sub_tree, sub_root, flat_codelength)) => {
                        self.sub_module_recursion(
                            &mut sub_tree,
                            sub_root,
                            &leaf_node_ids(&sub_tree, sub_root),
                            &[],
                            undirected,
                            config,
                            next_seed,
                        );
                        let hierarchical = self.hierarchical_codelength(&sub_tree, false);
                        if hierarchical + 1e-15 < flat_codelength {
                            let improvement = flat_codelength - hierarchical;
                            tree.attach_sub_engine(
                                module,
                                SubEngine { tree: sub_tree, codelength: hierarchical },
                            )
                            .expect("module was a plain leaf-module, never given ordinary children");
                            queue.record_result(improvement, true);
                        } else {
                            queue.record_result(0.0, false);
                        }
                    }
                    None => queue.record_result(0.0, false),
                }
            }

            log::debug!(
                "sub-module recursion level: improvement {:.6}",
                queue.level_improvement
            );
            if queue.level_improvement <= 0.0 {
                break;
            }
        }
    }

    /// Build a standalone sub-network for `module`'s leaves (internal edges only;
    /// each leaf keeps its true whole-network `enter_flow`/`exit_flow` so mass
    /// leaving the module is already accounted for without a materialized dangling
    /// node, spec.md §4.7 step 3), then partition it to two levels. Returns `None`
    /// when the module has fewer than two leaves or fails to split at all.
    #[allow(clippy::too_many_arguments)]
    fn try_build_sub_engine(
        &self,
        tree: &Tree,
        module: NodeId,
        leaves: &[NodeId],
        edges: &[(u32, u32, f64)],
        undirected: bool,
        config: &InfomapConfig,
        seed: u64,
    ) -> Option<(Tree, NodeId, f64)> {
        let leaf_children: Vec<NodeId> = tree.children(module).filter(|&c| tree.is_leaf(c)).collect();
        if leaf_children.len() < 2 {
            return None;
        }
        let flat_codelength = leaf_module_codelength(tree, module);

        let leaf_position: HashMap<NodeId, u32> =
            leaves.iter().enumerate().map(|(i, &l)| (l, i as u32)).collect();

        let mut local_index: HashMap<u32, u32> = HashMap::new();
        let mut sub_tree = Tree::new();
        let mut sub_leaves = Vec::with_capacity(leaf_children.len());
        for &leaf in &leaf_children {
            let Some(&orig_pos) = leaf_position.get(&leaf) else { continue };
            let data = tree.data(leaf);
            let new_leaf = sub_tree.new_leaf(data.flow.flow, data.state_id, data.physical_id, data.layer_id);
            {
                let nd = sub_tree.data_mut(new_leaf);
                nd.flow = data.flow;
                nd.name = data.name.clone();
                nd.meta_category = data.meta_category;
                nd.multi_flow = data.multi_flow.clone();
            }
            local_index.insert(orig_pos, sub_leaves.len() as u32);
            sub_leaves.push(new_leaf);
        }
        if sub_leaves.len() < 2 {
            return None;
        }

        let mut sub_edges = Vec::new();
        for &(source, target, flow) in edges {
            if let (Some(&ls), Some(&lt)) = (local_index.get(&source), local_index.get(&target)) {
                sub_edges.push((ls, lt, flow));
            }
        }

        let mut sub_config = config.clone();
        sub_config.seed = seed;
        let mut objective = self.objective_kind.build();
        objective.init(&sub_config);
        objective.init_sub_network(&sub_tree, &sub_leaves);
        let modules = {
            let mut optimizer = GreedyOptimizer::new(
                objective.as_mut(),
                &sub_tree,
                sub_leaves.clone(),
                &sub_edges,
                undirected,
                &sub_config,
            );
            optimizer.optimize_active_network(&mut sub_tree);
            optimizer.consolidate_modules(&mut sub_tree)
        };
        if modules.len() < 2 {
            return None;
        }
        let sub_root = attach_root(&mut sub_tree, &modules);
        Some((sub_tree, sub_root, flat_codelength))
    }

    /// spec.md §4.7's `calcCodelengthOnTree(includeRoot)`: bottom-up sum of every
    /// interior node's own index codelength (skipped at the root when
    /// `include_root` is false) plus, at each leaf-module, its module codelength —
    /// or a sub-engine's own (already-hierarchical) codelength in its place.
    pub fn hierarchical_codelength(&self, tree: &Tree, include_root: bool) -> f64 {
        match tree.root() {
            Some(root) => self.subtree_codelength(tree, root, include_root),
            None => 0.0,
        }
    }

    fn subtree_codelength(&self, tree: &Tree, node: NodeId, include_index_here: bool) -> f64 {
        if tree.is_leaf(node) {
            return 0.0;
        }
        let children: Vec<NodeId> = tree.children(node).collect();
        let mut total = if include_index_here {
            index_codelength_of_children(tree, &children)
        } else {
            0.0
        };

        let all_terminal = children.iter().all(|&c| tree.is_leaf(c) || tree.has_sub_engine(c));
        if all_terminal {
            total += leaf_module_codelength(tree, node);
            for &child in &children {
                if let Some(sub) = tree.sub_engine(child) {
                    total += sub.codelength;
                }
            }
        } else {
            for &child in &children {
                total += self.subtree_codelength(tree, child, true);
            }
        }
        total
    }
}

/// Create one node per module, attach them all under a fresh root, and return the
/// root (spec.md §4.5 step 3's "installs modules as the new active level").
fn attach_root(tree: &mut Tree, modules: &[NodeId]) -> NodeId {
    let total_flow: f64 = modules.iter().map(|&m| tree.data(m).flow.flow).sum();
    let root = tree.new_node(NodeData {
        flow: FlowData { flow: total_flow, ..Default::default() },
        ..Default::default()
    });
    for &module in modules {
        tree.add_child(root, module);
    }
    tree.set_root(root);
    root
}

/// Seed a fresh arena's leaves from a finalized [`Network`] and its computed
/// [`crate::flow::FlowResult`] (spec.md §4.5 step 1's implicit "load the network").
fn build_leaf_tree(
    network: &Network,
    flow: &crate::flow::FlowResult,
) -> (Tree, Vec<NodeId>, Vec<(u32, u32, f64)>) {
    let mut tree = Tree::new();
    let mut leaves = Vec::with_capacity(network.num_state_nodes());
    for (i, info) in network.nodes.iter().enumerate() {
        let leaf = tree.new_leaf(flow.node_flow[i], info.state_id, info.physical_id, info.layer_id);
        {
            let data = tree.data_mut(leaf);
            data.flow.enter_flow = flow.node_enter_flow[i];
            data.flow.exit_flow = flow.node_exit_flow[i];
            data.flow.teleport_weight = flow.node_teleport_weight[i];
            data.name = info.name.clone();
            data.meta_category = info.meta_categories.first().copied();
        }
        leaves.push(leaf);
    }
    let edges: Vec<(u32, u32, f64)> = flow.edges.iter().map(|e| (e.source, e.target, e.flow)).collect();
    (tree, leaves, edges)
}

/// Aggregate the current top modules of `root` into a super-level network: modules
/// become leaves, edges crossing module boundaries are summed (spec.md §4.7 step 2,
/// §4.6's coarse-tune).
fn build_module_level_network(
    tree: &Tree,
    root: NodeId,
    leaves: &[NodeId],
    edges: &[(u32, u32, f64)],
) -> (Vec<NodeId>, Vec<(u32, u32, f64)>) {
    let modules: Vec<NodeId> = tree.children(root).collect();
    let module_index: HashMap<NodeId, u32> =
        modules.iter().enumerate().map(|(i, &m)| (m, i as u32)).collect();
    let leaf_module_index: Vec<Option<u32>> = leaves
        .iter()
        .map(|&leaf| tree.parent(leaf).and_then(|m| module_index.get(&m).copied()))
        .collect();

    let mut aggregate: HashMap<(u32, u32), f64> = HashMap::new();
    for &(source, target, flow) in edges {
        let (Some(ms), Some(mt)) =
            (leaf_module_index[source as usize], leaf_module_index[target as usize])
        else {
            continue;
        };
        if ms == mt {
            continue;
        }
        *aggregate.entry((ms, mt)).or_insert(0.0) += flow;
    }
    let module_edges: Vec<(u32, u32, f64)> =
        aggregate.into_iter().map(|((s, t), f)| (s, t, f)).collect();
    (modules, module_edges)
}

/// The per-module codelength term of the flat map equation (spec.md §4.3), treating
/// `module`'s direct leaf children as the symbols of one module and `module`'s own
/// aggregate `flow`/`exit_flow` (set by `consolidate_modules`) as its boundary flow.
fn leaf_module_codelength(tree: &Tree, module: NodeId) -> f64 {
    let leaf_children: Vec<NodeId> = tree.children(module).filter(|&c| tree.is_leaf(c)).collect();
    let node_flow_log_node_flow: f64 =
        leaf_children.iter().map(|&c| plogp(tree.data(c).flow.flow)).sum();
    let data = tree.data(module).flow;
    let flow_log_flow = plogp(data.flow + data.exit_flow);
    let enter_log_enter = plogp(data.exit_flow);
    flow_log_flow - enter_log_enter - node_flow_log_node_flow
}

/// The index codelength contributed by one interior node's direct children acting
/// as its module partition (spec.md §4.3's index term, objective-agnostic: none of
/// the five variants change how entries/exits are aggregated, only the per-module
/// term).
pub(crate) fn index_codelength_of_children(tree: &Tree, children: &[NodeId]) -> f64 {
    let enter_flow: f64 = children.iter().map(|&c| tree.data(c).flow.exit_flow).sum();
    let enter_log_enter: f64 = children.iter().map(|&c| plogp(tree.data(c).flow.exit_flow)).sum();
    plogp(enter_flow) - enter_log_enter
}

/// The top level's own index codelength alone, with every module's internal cost
/// excluded — spec.md §6's `index_codelength` scalar, as distinct from
/// [`InfomapEngine::hierarchical_codelength`]'s full-tree sum.
pub fn top_level_index_codelength(tree: &Tree, root: NodeId) -> f64 {
    let children: Vec<NodeId> = tree.children(root).collect();
    index_codelength_of_children(tree, &children)
}

/// `leaves` of a freshly built sub-engine tree, in tree order, used to seed the next
/// nesting level of [`InfomapEngine::sub_module_recursion`].
fn leaf_node_ids(tree: &Tree, root: NodeId) -> Vec<NodeId> {
    crate::tree::iter::LeafIter::new(tree, root).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_utils::undirected;

    #[test]
    fn four_node_ring_collapses_to_one_top_module() {
        let network = undirected(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)]);
        let config = InfomapConfig { two_level: true, ..Default::default() };
        let engine = InfomapEngine::new(config, ObjectiveKind::MapEq);
        let trial = engine.run(network).unwrap();

        let root = trial.tree.root().unwrap();
        assert_eq!(trial.tree.child_degree(root), 1, "a symmetric ring should collapse to one module");
        assert!(trial.codelength >= 0.0);
    }

    #[test]
    fn disconnected_components_form_separate_top_modules() {
        let network = undirected(6, &[(0, 1, 1.0), (2, 3, 1.0), (4, 5, 1.0)]);
        let config = InfomapConfig { two_level: true, ..Default::default() };
        let engine = InfomapEngine::new(config, ObjectiveKind::MapEq);
        let trial = engine.run(network).unwrap();

        let root = trial.tree.root().unwrap();
        assert_eq!(trial.tree.child_degree(root), 3);
    }

    #[test]
    fn two_level_config_never_attaches_a_sub_engine() {
        let network = undirected(
            6,
            &[(0, 1, 1.0), (1, 2, 1.0), (0, 2, 1.0), (3, 4, 1.0), (4, 5, 1.0), (3, 5, 1.0), (2, 3, 0.01)],
        );
        let config = InfomapConfig { two_level: true, num_trials: 1, ..Default::default() };
        let engine = InfomapEngine::new(config, ObjectiveKind::MapEq);
        let trial = engine.run(network).unwrap();

        let root = trial.tree.root().unwrap();
        for node in crate::tree::iter::PreOrderIter::new(&trial.tree, root) {
            assert!(!trial.tree.has_sub_engine(node));
        }
    }

    #[test]
    fn hierarchical_codelength_is_non_negative() {
        let network = undirected(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)]);
        let config = InfomapConfig { two_level: true, ..Default::default() };
        let engine = InfomapEngine::new(config, ObjectiveKind::MapEq);
        let trial = engine.run(network).unwrap();
        assert!(trial.hierarchical_codelength >= -1e-9);
    }
}
